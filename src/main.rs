use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use scope_golem::config::{self, ScopeGolemConfig};
use scope_golem::log::parse_log_level;
use scope_golem::scenario;
use scope_golem::types::FailurePolicy;
use scope_golem::{log_error, log_info};

#[derive(Parser)]
#[command(name = "scope-golem", about = "Replay lifecycle scenarios against the scope registry")]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to config file (defaults to {root}/scope-golem.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug). Overrides the config file.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario file and print every task execution
    Replay {
        /// Scenario TOML file
        scenario: PathBuf,
        /// Keep running remaining tasks when one fails
        #[arg(long)]
        isolate: bool,
    },
    /// Load and validate the config file
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let level = match cli.log_level.as_deref().map(parse_log_level) {
        Some(Ok(level)) => level,
        Some(Err(e)) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        None => config.logging.level,
    };
    scope_golem::log::set_log_level(level);

    let result = match cli.command {
        Commands::Replay { scenario, isolate } => handle_replay(&config, &scenario, isolate),
        Commands::CheckConfig => handle_check_config(&config),
    };

    if let Err(e) = result {
        log_error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load(cli: &Cli) -> Result<ScopeGolemConfig, String> {
    match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(&cli.root),
    }
}

fn handle_replay(
    config: &ScopeGolemConfig,
    scenario_path: &Path,
    isolate: bool,
) -> Result<(), String> {
    let scenario = scenario::load_scenario(scenario_path)?;

    let mut registry = config.registry.clone();
    if isolate {
        registry.failure_policy = FailurePolicy::Isolate;
    }

    let report = scenario::replay(&scenario, registry)?;

    for execution in &report.executions {
        println!(
            "{:<8} {:<16} {}",
            execution.phase, execution.scope, execution.label
        );
    }
    match &report.root {
        Some(root) => println!("root: {}", root),
        None => println!("root: (none)"),
    }
    println!("open scopes: {}", report.remaining_scopes.join(", "));

    if report.errors.is_empty() {
        Ok(())
    } else {
        Err(format!("{} task error(s) during replay", report.errors.len()))
    }
}

fn handle_check_config(config: &ScopeGolemConfig) -> Result<(), String> {
    log_info!(
        "Config OK: failure_policy={}, max_hierarchy_depth={}, evict_on_close={}, log_level={}",
        config.registry.failure_policy,
        config.registry.max_hierarchy_depth,
        config.registry.evict_on_close,
        config.logging.level
    );
    Ok(())
}
