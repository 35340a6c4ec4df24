// RepCRec engine entry point.
//
// Parses the command line per spec.md §6, wires up logging, and runs
// the driver to completion.

use std::fs::File;
use std::process::ExitCode;

use repcrec::config::{EngineConfig, DEFAULT_BASE_PORT};
use repcrec::driver::Driver;
use repcrec::http;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "usage: repcrec [script] [-n sites] [-v variables] [-o output] [-s] [-i]"
}

fn parse_args() -> Result<EngineConfig, String> {
    let mut config = EngineConfig::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-n" => {
                let value = args.next().ok_or("-n requires a value")?;
                config.num_sites = value.parse().map_err(|_| "-n expects an integer")?;
            }
            "-v" => {
                let value = args.next().ok_or("-v requires a value")?;
                config.num_variables = value.parse().map_err(|_| "-v expects an integer")?;
            }
            "-o" => {
                config.output_path = Some(args.next().ok_or("-o requires a value")?);
            }
            "-s" => config.expose_http = true,
            "-i" => config.read_stdin = true,
            "-h" | "--help" => return Err(usage().to_string()),
            other if !other.starts_with('-') => config.script_path = Some(other.to_string()),
            other => return Err(format!("unrecognised option: {other}")),
        }
    }

    if !config.read_stdin && config.script_path.is_none() {
        return Err(usage().to_string());
    }

    Ok(config)
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match &config.output_path {
        Some(path) => match File::create(path) {
            Ok(file) => {
                builder
                    .with_writer(move || file.try_clone().expect("clone log file handle"))
                    .with_ansi(false)
                    .init();
            }
            Err(err) => {
                builder.init();
                error!(%err, path, "could not open output file, logging to stdout");
            }
        },
        None => builder.init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match parse_args() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config);

    let snapshot_store = if config.expose_http {
        let store = http::new_snapshot_store();
        let base_port = if config.base_port == 0 { DEFAULT_BASE_PORT } else { config.base_port };
        http::spawn_status_servers(store.clone(), base_port, config.num_sites);
        Some(store)
    } else {
        None
    };

    let mut driver = Driver::new(config, snapshot_store);
    if let Err(err) = driver.run() {
        error!(%err, "engine run failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
