// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use clinichat::config::GatewayConfig;

#[tokio::main]
async fn main() {
    let config = GatewayConfig::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    clinichat::init_tracing(&config);

    if let Err(e) = clinichat::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
