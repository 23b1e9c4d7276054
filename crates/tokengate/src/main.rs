// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use tokengate::config::Cli;

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr; stdout carries the JSON report lines.
    match cli.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    match tokengate::run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}
