//! Model Packager CLI
//!
//! Entry point for the `model-packager` command-line tool. The full pipeline
//! run is the library entry `Pipeline::run`, driven by a host service that
//! supplies the storage and registry clients; the CLI covers the
//! operator-facing checks.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use model_packager::config::AppConfig;
use model_packager::params::{ParamKey, ParameterSet};
use model_packager::validation::{validate_all, ValidatorKind};
use model_packager::verification::check_local_integrations;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "model-packager")]
#[command(about = "Model packaging and publish pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the process environment against the required parameters
    CheckParams {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate parameters and probe the local and importer integrations
    CheckIntegrations {
        /// Path to the settings YAML file
        #[arg(long, short = 'c', default_value = "settings.yaml")]
        config: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Load and print the settings file
    ShowConfig {
        /// Path to the settings YAML file
        #[arg(long, short = 'c', default_value = "settings.yaml")]
        config: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::CheckParams { json } => run_check_params(json),
        Commands::CheckIntegrations { config, json } => run_check_integrations(&config, json),
        Commands::ShowConfig { config } => run_show_config(&config),
    }
}

fn run_check_params(json: bool) {
    let params = ParameterSet::from_env();
    let missing = params.missing_mandatory();
    let failures = validate_all(ValidatorKind::standard_set(), &params)
        .err()
        .unwrap_or_default();

    if json {
        let report = serde_json::json!({
            "missing-mandatory": missing.iter().map(|k| k.env_name()).collect::<Vec<_>>(),
            "validation-errors": failures.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                process::exit(1);
            }
        }
    } else if missing.is_empty() && failures.is_empty() {
        println!("All required parameters are present.");
    } else {
        for name in &missing {
            println!("missing mandatory parameter: {name}");
        }
        for failure in &failures {
            println!("{failure}");
        }
    }

    if missing.is_empty() && failures.is_empty() {
        process::exit(0);
    }
    process::exit(1);
}

fn run_check_integrations(config_path: &Path, json: bool) {
    let config = match AppConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading settings: {e}");
            process::exit(1);
        }
    };

    // The base model directory defaults to the settings file's resource dir.
    let mut params = ParameterSet::from_env();
    if !params.contains(ParamKey::ModelDir) {
        params.insert(ParamKey::ModelDir, config.resource_dir.clone());
    }

    let mut problems: Vec<String> = validate_all(ValidatorKind::standard_set(), &params)
        .err()
        .unwrap_or_default()
        .iter()
        .map(|f| f.to_string())
        .collect();
    problems.extend(
        check_local_integrations(&params)
            .iter()
            .map(|f| f.to_string()),
    );

    if json {
        let report = serde_json::json!({ "problems": problems });
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                process::exit(1);
            }
        }
    } else if problems.is_empty() {
        println!("All parameter and local integration checks passed.");
    } else {
        for problem in &problems {
            println!("{problem}");
        }
    }

    if problems.is_empty() {
        process::exit(0);
    }
    process::exit(1);
}

fn run_show_config(path: &Path) {
    match AppConfig::load(path) {
        Ok(config) => match serde_yaml::to_string(&config) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error rendering settings: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error loading settings: {e}");
            process::exit(1);
        }
    }
}
