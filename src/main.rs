// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, process::ExitCode, sync::Arc};

use axum_server::Handle;
use tokio_util::sync::CancellationToken;

use oidc_gate::{
    api::router,
    auth::Gate,
    config::{GateSettings, ProviderConfig, ServerConfig},
    discovery,
    error::{ApiErrorCatalog, ErrorCatalog},
    logging,
    state::AppState,
};

/// Time allowed for in-flight requests once shutdown starts.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    let server = match ServerConfig::from_env() {
        Ok(server) => server,
        Err(e) => {
            eprintln!("invalid server configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(server.log_format) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(server).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(server: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut provider = ProviderConfig::from_env()?;
    let settings = GateSettings::from_env()?;

    if provider.use_discovery {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()?;
        discovery::discover(&mut provider, &client).await?;
    }
    provider.validate()?;

    let catalog = match &server.error_catalog_path {
        Some(path) => ApiErrorCatalog::from_path(path)?,
        None => ApiErrorCatalog::builtin()?,
    };
    tracing::info!(entries = catalog.len(), "loaded error catalog");
    let catalog: Arc<dyn ErrorCatalog> = Arc::new(catalog);

    let shutdown = CancellationToken::new();
    let gate = Gate::new(&provider, settings, catalog)?.with_shutdown(shutdown.clone());
    let app = router(AppState::new(gate));

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone(), shutdown));

    tracing::info!(
        addr = %server.bind_addr,
        issuer = %provider.issuer,
        client_id = %provider.client_id,
        "OIDC gate listening (docs at /docs)"
    );

    axum_server::bind(server.bind_addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal(handle: Handle<SocketAddr>, shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
