use std::{process, sync::Arc};

use imageboard::{
    application::{error::AppError, repos::BoardRepo},
    cache::{CacheConfig, CacheStore, ContentCache},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        memory::MemoryBoardRepo,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repo = init_repository(&settings).await?;

    let cache_config = CacheConfig::from(&settings.cache);
    let store = Arc::new(CacheStore::from_config(&cache_config));
    let accountant = store.spawn_accountant();
    let cache = Arc::new(ContentCache::new(Arc::clone(&store), &cache_config));

    info!(
        target = "imageboard::bootstrap",
        enabled = cache_config.enabled,
        budget_mb = cache_config.budget_mb,
        freshness_ms = cache_config.freshness_ms,
        "Content cache ready"
    );

    let state = HttpState::new(repo, cache, settings.site.default_lang.as_str());
    let result = serve_http(&settings, state).await;
    accountant.abort();
    result
}

async fn init_repository(settings: &config::Settings) -> Result<Arc<dyn BoardRepo>, AppError> {
    let repo = match settings.storage.seed_file.as_ref() {
        Some(path) => {
            let repo = MemoryBoardRepo::load_seed(path).await?;
            for board in &settings.storage.boards {
                repo.add_board(board.as_str());
            }
            repo
        }
        None => MemoryBoardRepo::new(settings.storage.boards.iter().map(String::as_str)),
    };

    info!(
        target = "imageboard::bootstrap",
        boards = ?repo.boards(),
        threads = repo.thread_count(),
        "Board repository ready"
    );
    Ok(Arc::new(repo))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "imageboard::bootstrap",
        addr = %settings.server.addr,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(());
        },
    );
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        _ = shutdown_rx => {}
    }

    // Draining connections once the signal arrived.
    match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(_) => {
            warn!(
                target = "imageboard::bootstrap",
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
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
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "imageboard::bootstrap", "Shutdown signal received");
}
