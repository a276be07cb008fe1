//! aspect-hooks command line: run and check interception scenarios

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aspect_hooks::hooks::{AspectsConfig, Position};
use aspect_hooks::platform_dirs;
use aspect_hooks::scenario::{Scenario, ScenarioReport};

#[derive(Parser, Debug)]
#[command(name = "aspect-hooks")]
#[command(about = "Attach before/instead/after handlers to dynamically dispatched members")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log filter used when RUST_LOG is unset (e.g. "debug", "aspect_hooks=trace")
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Also write logs to a daily rolling file in the platform logs directory
    #[arg(long, global = true)]
    log_file: bool,

    /// Engine configuration file (defaults to the platform config file when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scenario file and print its trace
    Run {
        /// Scenario file, or the name of one in the scenarios directory
        scenario: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a scenario file without running it
    Check {
        scenario: PathBuf,
    },

    /// Run the bundled Animal/Dog walkthrough
    Demo {
        #[arg(long)]
        json: bool,
    },

    /// Print the effective engine configuration
    Config,

    /// Show platform directories
    Paths,

    /// Describe the handler positions
    Positions,
}

fn init_tracing(level: &str, log_file: bool) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = if log_file {
        let dir = platform_dirs::logs_dir()?;
        platform_dirs::ensure_dir(&dir)?;
        let appender = tracing_appender::rolling::daily(dir, "aspect-hooks.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn load_config(path: Option<&Path>) -> Result<AspectsConfig> {
    let config = match path {
        Some(path) => AspectsConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => AspectsConfig::load_default()?,
    };
    Ok(config)
}

/// Resolve a bare scenario name against the scenarios directory
fn resolve_scenario(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let mut candidate = platform_dirs::scenarios_dir()?.join(path);
    if candidate.extension().is_none() {
        candidate.set_extension("toml");
    }
    if candidate.exists() {
        Ok(candidate)
    } else {
        anyhow::bail!("Scenario not found: {}", path.display())
    }
}

fn print_report(report: &ScenarioReport, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("Scenario: {}", report.name);
        for entry in &report.trace {
            println!("{}", entry);
        }
        if !report.stats.is_empty() {
            println!();
            println!("Statistics:");
            for entry in &report.stats {
                println!(
                    "  {:<8} runs={} ok={} failed={}",
                    entry.aspect,
                    entry.stats.total_executions,
                    entry.stats.successful_executions,
                    entry.stats.failed_executions
                );
            }
        }
        println!();
        if report.passed() {
            println!("PASS");
        } else {
            println!("FAIL");
            for failure in &report.failures {
                println!("  - {}", failure);
            }
        }
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli.log_level, cli.log_file)?;

    match cli.command {
        Command::Run { scenario, json } => {
            let config = load_config(cli.config.as_deref())?;
            let scenario = Scenario::load(resolve_scenario(&scenario)?)?;
            tracing::info!(scenario = %scenario.name, "Running scenario");
            let report = scenario.run_with(&config.engine)?;
            print_report(&report, json)
        }
        Command::Check { scenario } => {
            let path = resolve_scenario(&scenario)?;
            let scenario = Scenario::load(&path)?;
            scenario.check()?;
            println!(
                "{}: {} classes, {} objects, {} aspects, {} steps",
                path.display(),
                scenario.classes.len(),
                scenario.objects.len(),
                scenario.aspects.len(),
                scenario.steps.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Demo { json } => {
            let config = load_config(cli.config.as_deref())?;
            let report = Scenario::demo()?.run_with(&config.engine)?;
            print_report(&report, json)
        }
        Command::Config => {
            let config = load_config(cli.config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Paths => {
            println!("Config file:  {}", platform_dirs::config_file()?.display());
            println!("Scenarios:    {}", platform_dirs::scenarios_dir()?.display());
            println!("Logs:         {}", platform_dirs::logs_dir()?.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Positions => {
            for position in Position::all() {
                println!("{:<8} {}", position, position.description());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
