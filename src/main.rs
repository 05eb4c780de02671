use gitward::{Config, PathValidator, SecurityLog};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const USAGE: &str = "Usage:
  gitward check-path <root> <path>   Validate a path against the configured policy
  gitward config                     Print the effective configuration";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

fn main() -> ExitCode {
    init_tracing();

    // Configuration is validated before anything else runs
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["check-path", root, path] => check_path(&config, Path::new(root), path),
        ["config"] => match config.to_toml() {
            Ok(toml) => {
                print!("{}", toml);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::from(2)
            }
        },
        _ => {
            eprintln!("{}", USAGE);
            ExitCode::from(64)
        }
    }
}

fn check_path(config: &Config, root: &Path, path: &str) -> ExitCode {
    let policy = config.security_policy(root);
    let validator = PathValidator::new(Arc::new(SecurityLog::new()));
    let result = validator.validate(path, root, &policy);

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    }

    if result.is_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
