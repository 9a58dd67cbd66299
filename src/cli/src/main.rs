//! A3S OCM CLI entry point.

use clap::Parser;

use a3s_ocm_cli::commands::{dispatch, log_filter, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&cli))
        .with_target(false)
        .init();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
