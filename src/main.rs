use std::net::SocketAddr;

use gateway_lib::config::AppConfig;
use gateway_lib::{build_state, gateway};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("loaded environment from {path:?}");
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port).parse()?;
    let tls = config.tls_cert.clone().zip(config.tls_key.clone());

    let state = build_state(config);
    let app = gateway::routes::build(state);

    match tls {
        Some((cert, key)) => {
            tracing::info!(%addr, "starting gateway with TLS termination");
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
            axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
        }
        None => {
            tracing::info!(%addr, "starting gateway (plain HTTP; terminate TLS upstream if needed)");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
