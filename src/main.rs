// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use clap::Parser;
use portcullis::config;
use portcullis::engine::StreamOrchestrator;
use portcullis::policy::catalog::PolicyCatalog;
use portcullis::transport::PolicyHost;

#[derive(Parser)]
#[command(name = "portcullis-host", about = "Streaming policy-execution host")]
struct Cli {
    /// Path to the portcullis.yaml config file
    #[arg(long, default_value = "portcullis.yaml", env = "PORTCULLIS_CONFIG")]
    config: String,

    /// Listen address override (defaults to transport.listen from config)
    #[arg(long, env = "PORTCULLIS_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = config::FileSource::new(cli.config);
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        policy = %config.policy.name,
        activity_timeout_ms = config.engine.activity_timeout.as_millis() as u64,
        contract_hash = %config.contract_hash,
        "config loaded"
    );

    let catalog = Arc::new(PolicyCatalog::new());
    if !catalog.contains(&config.policy.name) {
        tracing::error!(policy = %config.policy.name, "configured policy not in catalog");
        std::process::exit(1);
    }

    let orchestrator = Arc::new(StreamOrchestrator::new(config.stream_config()));
    let policy_name = config.policy.name.clone();
    let host = Arc::new(
        PolicyHost::new(catalog, orchestrator).with_default_policy(policy_name.clone()),
    );

    let addr = cli.listen.unwrap_or_else(|| config.transport.listen.clone());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, policy = %policy_name, "portcullis host listening");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                continue;
            }
        };
        tracing::debug!(%peer, "connection accepted");

        let host = Arc::clone(&host);
        tokio::spawn(async move {
            let (reader, writer) = socket.into_split();
            if let Err(err) = host.serve_connection(reader, writer).await {
                tracing::warn!(%peer, error = %err, "connection ended with error");
            }
        });
    }
}
