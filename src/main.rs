use anyhow::{Context as _, Result};
use burnish::config::BurnishConfig;
use burnish::context::SupportingFacts;
use burnish::document::StoryDocument;
use burnish::oracle::ClaudeCliOracle;
use burnish::pipeline::Orchestrator;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "burnish")]
#[command(version, about = "Story document enhancement pipeline")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the burnish.toml configuration
    #[arg(long, global = true, default_value = "burnish.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the advisor pipeline over a story file
    Run {
        story: PathBuf,
        /// TOML file with supporting facts
        #[arg(long)]
        facts: Option<PathBuf>,
        /// Write the enhanced document here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Write the run report and iteration history as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Validate the configuration and scope table
    Check,
    /// List configured advisors and their scopes
    Advisors,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            story,
            facts,
            out,
            report,
        } => run(&cli.config, &story, facts, out, report).await,
        Commands::Check => check(&cli.config),
        Commands::Advisors => advisors(&cli.config),
    }
}

async fn run(
    config_path: &PathBuf,
    story_path: &PathBuf,
    facts_path: Option<PathBuf>,
    out_path: Option<PathBuf>,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let validated = BurnishConfig::load(config_path)?.validate()?;

    let raw_story = std::fs::read_to_string(story_path)
        .with_context(|| format!("failed to read story at {}", story_path.display()))?;
    let mut document = StoryDocument::from_content(&raw_story)?;

    let facts = match facts_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read facts at {}", path.display()))?;
            SupportingFacts::from_toml_str(&raw)
                .with_context(|| format!("failed to parse facts at {}", path.display()))?
        }
        None => SupportingFacts::new(),
    };

    let oracle = ClaudeCliOracle::new(validated.oracle.command.clone())
        .with_timeout(validated.oracle.timeout)
        .with_skip_permissions(validated.oracle.skip_permissions);

    let orchestrator = Orchestrator::new(
        validated.catalog,
        validated.rules,
        validated.settings,
        Arc::new(oracle),
    )
    .with_order(validated.order)?;

    let run_report = orchestrator.run(&mut document, &facts).await?;
    eprintln!("{}", run_report);

    match out_path {
        Some(path) => {
            std::fs::write(&path, document.current_content())
                .with_context(|| format!("failed to write document to {}", path.display()))?;
            eprintln!("Enhanced document written to {}", path.display());
        }
        None => print!("{}", document.current_content()),
    }

    if let Some(path) = report_path {
        let payload = serde_json::json!({
            "report": run_report,
            "iteration_history": document.iteration_history(),
            "failed_iterations": document.failed_iterations(),
            "applied_iteration_ids": document.applied_iteration_ids(),
        });
        std::fs::write(&path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        eprintln!("Run report written to {}", path.display());
    }

    Ok(())
}

fn check(config_path: &PathBuf) -> Result<()> {
    let validated = BurnishConfig::load(config_path)?.validate()?;
    println!(
        "Configuration OK: {} advisor(s), {} path(s), retry bound {}, judge floor {}",
        validated.catalog.len(),
        validated.rules.len(),
        validated.settings.retry_bound,
        validated.settings.judge_floor,
    );
    Ok(())
}

fn advisors(config_path: &PathBuf) -> Result<()> {
    let validated = BurnishConfig::load(config_path)?.validate()?;
    if validated.catalog.is_empty() {
        println!("No advisors configured");
        return Ok(());
    }
    for advisor_id in &validated.order {
        let spec = validated.catalog.get(advisor_id)?;
        let scope: Vec<String> = spec.scope.iter().map(|p| p.to_string()).collect();
        println!("{}: {} [scope: {}]", spec.id, spec.purpose, scope.join(", "));
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "burnish=debug" } else { "burnish=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
