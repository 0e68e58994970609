use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    provisioner::{MinioAdmin, ProvisionPlan, Provisioner, Readiness, wait_until_ready},
    store_service::{AppState, S3Store},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + provision flag ---
    let (cfg, provision) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting bucketbridge for bucket `{}` at {}",
        cfg.bucket,
        cfg.endpoint
    );

    // --- Handle provisioning mode ---
    if provision {
        run_provisioning(&cfg).await?;
        tracing::info!("Provisioning complete.");
        return Ok(()); // exit after provisioning
    }

    // --- Initialize store client ---
    let store = Arc::new(S3Store::connect(&cfg).await);

    // --- Startup gate: wait for the store before accepting traffic ---
    let backoff = Duration::from_secs(cfg.health_backoff_secs);
    match wait_until_ready(store.as_ref(), cfg.health_retries, backoff).await {
        Readiness::Ready => tracing::info!("Object store is reachable."),
        Readiness::TimedOut { attempts } => {
            anyhow::bail!(
                "object store at {} not reachable after {} attempts",
                cfg.endpoint,
                attempts
            );
        }
    }

    // --- Build router ---
    let state = AppState {
        store,
        presign: cfg.presign,
    };
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// One-shot provisioning: create the bucket, the application identity and
/// its access policy, idempotently, then return.
async fn run_provisioning(cfg: &config::AppConfig) -> Result<()> {
    let admin_access_key = cfg
        .admin_access_key
        .as_deref()
        .context("S3_ADMIN_ACCESS_KEY must be set for --provision")?;
    let admin_secret_key = cfg
        .admin_secret_key
        .as_deref()
        .context("S3_ADMIN_SECRET_KEY must be set for --provision")?;

    let admin = MinioAdmin::connect(
        &cfg.endpoint,
        &cfg.region,
        admin_access_key,
        admin_secret_key,
    )
    .await?;

    let plan = ProvisionPlan {
        bucket: cfg.bucket.clone(),
        access_key: cfg.access_key.clone(),
        secret_key: cfg.secret_key.clone(),
        policy_name: cfg.policy_name.clone(),
    };
    let provisioner = Provisioner::new(
        admin,
        plan,
        cfg.provision_retries,
        Duration::from_secs(cfg.provision_interval_secs),
    );
    provisioner.run().await?;
    Ok(())
}
