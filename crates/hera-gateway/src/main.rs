//! HERA Gateway - Entry point

use std::path::PathBuf;

use anyhow::Context;
use hera_config::{ConfigLoader, DEFAULT_ENV_PREFIX};
use hera_server::{Lifecycle, ShutdownSignal};
use hera_telemetry::{init_logging, init_metrics};
use tracing::info;

/// Command-line arguments.
struct Args {
    /// Path to a TOML or JSON configuration file.
    config: Option<PathBuf>,
    /// Start from development defaults.
    development: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            config: None,
            development: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    parsed.config = args.next().map(PathBuf::from);
                }
                "--dev" => parsed.development = true,
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("hera-gateway {}", hera_gateway::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        parsed
    }
}

fn print_help() {
    println!(
        r"HERA Gateway - Multi-tenant admission-control gateway

USAGE:
    hera-gateway [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
        --dev              Start from development defaults
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    HERA__SERVER__HTTP_ADDR                 Listen address (default: 0.0.0.0:8080)
    HERA__IDENTITY__ENDPOINT                Identity service base URL
    HERA__BUSINESS__ENDPOINT                Business backend base URL
    HERA__RATE_LIMIT__WRITE_LIMIT           Writes per window per tenant
    HERA__ADMISSION__MAX_REQUESTS_PER_HOUR  Requests per hour per source
    RUST_LOG                                Log filter override

    Variables in ./.env are loaded before the HERA__ overrides are applied.

EXAMPLES:
    # Run with configuration file
    hera-gateway --config /etc/hera/gateway.toml

    # Run with environment overrides only
    HERA__BUSINESS__ENDPOINT=http://localhost:3000 hera-gateway
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    loader = if args.development {
        loader.with_development()
    } else {
        loader.with_defaults()
    };
    if let Some(path) = &args.config {
        loader = loader
            .with_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    }
    let config = loader
        .with_dotenv()
        .context("failed to read .env")?
        .with_env_prefix(DEFAULT_ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    init_logging(&config.logging.log_config()).context("failed to initialize logging")?;
    if config.metrics.enabled {
        init_metrics(&config.metrics.metrics_config()).context("failed to initialize metrics")?;
    }

    info!(
        version = hera_gateway::VERSION,
        addr = %config.server.http_addr,
        environment = %config.server.environment,
        "starting HERA gateway"
    );

    Lifecycle::new(config)?
        .run(ShutdownSignal::with_os_signals())
        .await?;
    Ok(())
}
