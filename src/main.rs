//! EmberKV server binary.
//!
//! Loads the configuration file (plus a few command-line overrides), sets
//! up tracing, and runs the TCP server until a termination signal.

use emberkv::config::ServerConfig;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line options layered over the configuration file.
struct CliArgs {
    config_path: Option<String>,
    host: Option<String>,
    port: Option<u16>,
}

impl CliArgs {
    fn parse() -> Self {
        let mut parsed = CliArgs {
            config_path: None,
            host: None,
            port: None,
        };
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    parsed.config_path = Some(expect_value(&args, i));
                    i += 2;
                }
                "--host" | "-h" => {
                    parsed.host = Some(expect_value(&args, i));
                    i += 2;
                }
                "--port" | "-p" => {
                    let value = expect_value(&args, i);
                    parsed.port = Some(value.parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number '{}'", value);
                        std::process::exit(1);
                    }));
                    i += 2;
                }
                "--version" | "-v" => {
                    println!("EmberKV version {}", emberkv::VERSION);
                    std::process::exit(0);
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        parsed
    }
}

fn expect_value(args: &[String], i: usize) -> String {
    match args.get(i + 1) {
        Some(value) => value.clone(),
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
EmberKV - An In-Memory Key-Value Server

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -c, --config <FILE>  Configuration file (key value lines)
    -h, --host <HOST>    Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>    Port to listen on (default: 6379)
    -v, --version        Print version information
        --help           Print this help message

CONFIGURATION KEYS:
    bind, port, appendOnly, appendFilename, maxclients, requirepass,
    databases, dbfilename, peers, self

EXAMPLES:
    emberkv                           # 127.0.0.1:6379, AOF in ./aof.txt
    emberkv --port 6380               # alternate port
    emberkv --config emberkv.conf     # full configuration from a file
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = match &args.config_path {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.bind = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!(
        version = emberkv::VERSION,
        addr = %config.bind_address(),
        cluster = config.cluster_enabled(),
        append_only = config.append_only,
        "starting EmberKV"
    );

    emberkv::serve(Arc::new(config)).await
}
