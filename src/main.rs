use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use ritratto::{
    application::render::{RenderPolicy, RenderService},
    config,
    infra::{error::InfraError, http, telemetry},
};
use thiserror::Error;
use tokio::{net::TcpListener, sync::Notify};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_startup_error(&error);
        process::exit(1);
    }
}

fn report_startup_error(error: &StartupError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "startup error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "startup error");
    });
}

async fn run() -> Result<(), StartupError> {
    let (_cli, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let policy = RenderPolicy::from(&settings.render);
    if policy.debug {
        debug!(target = "ritratto::server", "debug mode enabled");
    }

    let renderer = Arc::new(RenderService::new(policy));
    let router = http::build_router(http::RenderState { renderer });

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::Io)?;
    info!(
        target = "ritratto::server",
        addr = %settings.server.addr,
        "starting server"
    );

    serve(listener, router, settings.server.graceful_shutdown)
        .await
        .map_err(InfraError::Io)?;
    info!(target = "ritratto::server", "shutting down");
    Ok(())
}

/// Serve until a shutdown signal arrives, then drain in-flight connections
/// for at most `drain` before giving up on the stragglers.
async fn serve(
    listener: TcpListener,
    router: axum::Router,
    drain: Duration,
) -> Result<(), std::io::Error> {
    let shutdown_started = Arc::new(Notify::new());
    let notify = shutdown_started.clone();

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!(
                target = "ritratto::server",
                "shutdown signal received; draining connections"
            );
            notify.notify_one();
        })
        .into_future();

    let drain_deadline = async {
        shutdown_started.notified().await;
        tokio::time::sleep(drain).await;
    };

    tokio::select! {
        result = server => result,
        () = drain_deadline => {
            warn!(
                target = "ritratto::server",
                drain_secs = drain.as_secs(),
                "graceful drain window expired; closing remaining connections"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(
                target = "ritratto::server",
                error = %err,
                "failed to install interrupt handler"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(
                    target = "ritratto::server",
                    error = %err,
                    "failed to install SIGTERM handler"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
