//! devicelab CLI - instrumentation test orchestrator for remote device labs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use devicelab::collect::{ArtifactCollector, GsutilStore};
use devicelab::config::{self, ModuleKind};
use devicelab::invoker::GcloudInvoker;
use devicelab::orchestrator::Orchestrator;
use devicelab::report::ConsoleReporter;
use devicelab::throttle::Throttle;

#[derive(Parser)]
#[command(name = "devicelab")]
#[command(about = "Instrumentation test orchestrator for remote device labs", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "devicelab.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run instrumentation tests for the configured modules
    Run {
        /// Only run the named modules (may be repeated)
        #[arg(short, long = "module")]
        modules: Vec<String>,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { modules } => run_modules(&cli.config, modules).await,
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(),
    }
}

async fn run_modules(config_path: &Path, module_filter: Vec<String>) -> Result<()> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if !module_filter.is_empty() {
        for name in &module_filter {
            if !config.modules.iter().any(|m| &m.name == name) {
                anyhow::bail!("unknown module '{name}'");
            }
        }
        config.modules.retain(|m| module_filter.contains(&m.name));
    }

    info!(
        "Loaded configuration from {} ({} modules)",
        config_path.display(),
        config.modules.len()
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; terminating in-flight runs");
                cancel.cancel();
            }
        });
    }

    let throttle = Arc::new(Throttle::new(Duration::from_secs(
        config.lab.min_spacing_secs,
    )));
    let invoker = GcloudInvoker::new(&config.lab, throttle, cancel.clone());
    let collector = ArtifactCollector::new(&config.lab, GsutilStore::new(&config.lab));

    let orchestrator = Orchestrator::new(config, invoker, collector, ConsoleReporter, cancel);
    let report = orchestrator.run().await;

    std::process::exit(report.exit_code());
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Bucket: {}", config.lab.bucket);
            println!("  Retry count: {}", config.lab.retry_count);
            println!("  Fail on error: {}", config.lab.fail_on_error);
            println!("  Invocation spacing: {}s", config.lab.min_spacing_secs);
            println!(
                "  Propagation delay: {}s",
                config.lab.propagation_delay_secs
            );
            match config.lab.invoke_timeout_secs {
                Some(secs) => println!("  Attempt timeout: {secs}s"),
                None => println!("  Attempt timeout: none"),
            }

            println!();
            println!("Modules:");
            for module in &config.modules {
                let kind = match module.kind {
                    ModuleKind::Application => "application",
                    ModuleKind::Library => "library",
                };
                println!(
                    "  {} ({kind}, variant {}, {} devices)",
                    module.name,
                    module.variant,
                    module.devices.len()
                );
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_config() -> Result<()> {
    let config = r#"# devicelab configuration file

[lab]
# Storage bucket the device lab writes results into.
bucket = "my-ci-results"
# Arguments appended verbatim to every service invocation.
extra_args = ""
# Maximum attempts per module, including the first.
retry_count = 3
# Fail the build when a module's tests still fail after all retries.
fail_on_error = true

[[modules]]
name = "myLib"
kind = "library"
variant = "debug"
test_artifact = "myLib/build/outputs/apk/androidTest/debug/myLib-debug-androidTest.apk"
coverage = false
orchestrator = false
devices = ["model=Pixel2,version=28"]
"#;

    let path = PathBuf::from("devicelab.toml");
    if path.exists() {
        eprintln!("devicelab.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created devicelab.toml");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  devicelab run");

    Ok(())
}
