use capability_dispatch::{
    build_app, build_dispatcher,
    config::{Config, TransportKind},
    logging,
    transport::{serve, stdio::LineTransport},
    AppState,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let dispatcher = build_dispatcher(&config)?;

    match config.transport {
        TransportKind::Stdio => {
            info!(
                framing = config.stdio_framing.as_str(),
                on_eof = config.stdio_eof.as_str(),
                "serving on stdio"
            );
            let mut transport = LineTransport::stdio(config.stdio_framing).on_eof(config.stdio_eof);
            tokio::select! {
                result = serve(&mut transport, &dispatcher) => result?,
                () = shutdown_signal() => {}
            }
            info!("stdio session ended");
        }
        TransportKind::Http => {
            let bind_socket = config.bind_socket()?;
            let app = build_app(AppState::new(dispatcher));
            let listener = tokio::net::TcpListener::bind(bind_socket).await?;

            info!(
                bind_addr = %config.bind_addr,
                bind_port = config.bind_port,
                "server starting"
            );

            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install shutdown signal handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
