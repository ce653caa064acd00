use std::sync::Arc;

use stateless_mcp::{
    auth::{middleware::MiddlewareChain, AuthMode},
    build_app,
    config::{Config, TransportKind},
    domain, logging,
    mcp::server::{RegistryServerFactory, ServerFactory},
    transport::stdio,
    AppState,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    logging::init_logging(config.debug);

    let factory: Arc<dyn ServerFactory> =
        Arc::new(RegistryServerFactory::new(Arc::new(domain::default_registry())));

    if config.transport == TransportKind::Stdio {
        info!("stdio transport starting");
        stdio::serve_stdio(factory).await?;
        return Ok(());
    }

    let bind_socket = config.bind_socket()?;
    let state = AppState::from_config(&config, factory, MiddlewareChain::default(), AuthMode::FailOpen)?;
    let auth = state.mcp.authenticator().describe();
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        endpoint = %config.endpoint,
        auth,
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            error!(error = %err, "unable to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
