use clap::Parser;

use ssogate_server::GatewayServer;
use ssogate_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};

#[derive(Debug, Parser)]
#[command(name = "ssogate", version, about = "Single-sign-on gateway")]
struct Cli {
    /// Configuration file
    #[arg(long, env = "SSOGATE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    ssogate_server::observability::init_tracing();

    let cli = Cli::parse();

    let cfg = match load_config(Some(&cli.config)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(path = %cli.config, "Configuration loaded");
    ssogate_server::observability::apply_logging_level(&cfg.logging.level);

    let server = match GatewayServer::build(cfg).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Gateway initialization failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err}");
    }
}
