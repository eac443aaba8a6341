use std::{process, sync::Arc};

use offline_worker::{
    config::{self, Command, PrefetchArgs, Settings},
    error::AppError,
    infra::{
        disk_cache::DiskCacheStorage,
        error::InfraError,
        http::{HttpState, build_router},
        network::HttpNetwork,
        telemetry,
    },
    worker::{
        CacheStorage, ClientId, LifecycleController, MemoryCacheStorage, Network, PrefetchJob,
        WorkerConfig, WorkerMessage,
    },
};
use tokio::sync::oneshot;
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let worker = Arc::new(build_worker(&settings)?);

    match command {
        Command::Serve(_) => run_serve(settings, worker).await,
        Command::Prefetch(args) => run_prefetch(worker, args).await,
    }
}

fn build_worker(settings: &Settings) -> Result<LifecycleController, AppError> {
    let storage = build_storage(settings)?;
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new()?);

    Ok(LifecycleController::new(
        WorkerConfig::from(&settings.worker),
        storage,
        network,
    ))
}

fn build_storage(settings: &Settings) -> Result<Arc<dyn CacheStorage>, AppError> {
    let quota = settings.worker.cache_quota_bytes.map(|quota| quota.get());

    let Some(dir) = settings.worker.cache_dir.as_ref() else {
        info!(
            target = "offline_worker::storage",
            "no cache directory configured; cache generations live in memory"
        );
        let storage = match quota {
            Some(quota) => MemoryCacheStorage::with_quota(quota),
            None => MemoryCacheStorage::new(),
        };
        return Ok(Arc::new(storage));
    };

    let storage = DiskCacheStorage::new(dir.clone())
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "offline_worker::storage",
        dir = %storage.root().display(),
        "cache generations stored on disk"
    );

    Ok(Arc::new(match quota {
        Some(quota) => storage.with_quota(quota),
        None => storage,
    }))
}

async fn run_serve(settings: Settings, worker: Arc<LifecycleController>) -> Result<(), AppError> {
    let (install, activation) = worker.start().await;
    info!(
        target = "offline_worker::serve",
        cache = %worker.config().cache_name,
        seeded = install.seeded,
        evicted = activation.evicted.len(),
        "worker active"
    );

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "offline_worker::serve",
        addr = %settings.server.addr,
        origin = %worker.config().origin,
        "listening"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        build_router(HttpState::new(worker)).into_make_service(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => {
            return flatten_server_result(result);
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| AppError::from(InfraError::from(err)))?;
        }
    }

    info!(
        target = "offline_worker::serve",
        timeout_secs = settings.server.graceful_shutdown.as_secs(),
        "shutting down"
    );
    let _ = shutdown_tx.send(());

    // Event streams stay open until the page disconnects, so the drain is bounded.
    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(result) => flatten_server_result(result),
        Err(_) => {
            warn!(
                target = "offline_worker::serve",
                "graceful shutdown timed out; dropping open connections"
            );
            server.abort();
            Ok(())
        }
    }
}

fn flatten_server_result(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn run_prefetch(worker: Arc<LifecycleController>, args: PrefetchArgs) -> Result<(), AppError> {
    worker.start().await;

    let client = ClientId::generate();
    let mut subscription = worker.clients().subscribe(client.clone());
    let printer = tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(
                    target = "offline_worker::prefetch",
                    error = %err,
                    "failed to encode worker message"
                ),
            }
            if matches!(message, WorkerMessage::CacheComplete(_)) {
                break;
            }
        }
    });

    let summary = worker
        .prefetch(PrefetchJob {
            resources: args.resources,
            client: Some(client),
            force_update: args.force,
        })
        .await;
    let _ = printer.await;

    info!(
        target = "offline_worker::prefetch",
        success = summary.success,
        failed = summary.failed,
        skipped = summary.skipped,
        updated = summary.updated,
        total = summary.total,
        "prefetch finished"
    );

    if summary.total > 0 && summary.failed == summary.total {
        return Err(AppError::validation("every resource failed to prefetch"));
    }

    Ok(())
}
