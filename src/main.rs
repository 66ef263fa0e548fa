use anyhow::{Context, Result};
use axum::Router;
use serde::Serialize;
use site_stack::{
    config::{AppConfig, Command},
    routes,
    services::{
        edge::EdgeService,
        local_backend::LocalBackend,
        stack::{DeployReport, StackApp},
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{collections::BTreeMap, fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::info!("Running {:?} with config: {:?}", command, cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db = connect(&cfg.database_url).await?;
    let backend = LocalBackend::new(db, &cfg.storage_dir, &cfg.edge_domain);
    backend.migrate().await.context("applying migrations")?;

    let ctx = cfg.context()?;
    let mut app = StackApp::new(&ctx);
    app.add_frontend(&cfg.resource_name, cfg.frontend_props());

    match command {
        Command::Deploy => {
            let reports = app.deploy(&backend, cfg.retry_policy()).await?;
            print_json(&reports)?;
            if let Some(path) = &cfg.outputs_file {
                write_outputs(path, &reports)?;
                tracing::info!("Wrote outputs to {}", path);
            }
        }
        Command::Destroy => {
            let reports = app.destroy(&backend, cfg.retry_policy()).await?;
            print_json(&reports)?;
        }
        Command::Outputs => {
            let outputs = app.outputs(&backend, cfg.retry_policy()).await?;
            print_json(&outputs.into_iter().collect::<BTreeMap<_, _>>())?;
        }
        Command::Serve => serve(&cfg, backend).await?,
    }

    Ok(())
}

async fn connect(database_url: &str) -> Result<Arc<sqlx::Pool<sqlx::Sqlite>>> {
    // Extract the local file path SQLx will use
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(Arc::new(pool))
}

async fn serve(cfg: &AppConfig, backend: LocalBackend) -> Result<()> {
    let app: Router = routes::routes::routes().with_state(EdgeService::new(backend));

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

    tracing::info!("Edge emulator listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Outputs keyed by stack id, one object per stack.
fn write_outputs(path: &str, reports: &[DeployReport]) -> Result<()> {
    let outputs = reports
        .iter()
        .map(|report| (report.stack.as_str(), &report.outputs))
        .collect::<BTreeMap<_, _>>();
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_vec_pretty(&outputs)?)
        .with_context(|| format!("writing outputs file {}", path))?;
    Ok(())
}
