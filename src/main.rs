use cloudbuild_notify::error::NotifyError;
use cloudbuild_notify::github::GithubClient;
use cloudbuild_notify::logging::{FileLogger, parse_rotation, setup_logging};
use cloudbuild_notify::notify::ChatNotifier;
use cloudbuild_notify::pipeline::Dispatcher;
use cloudbuild_notify::subscriber::Subscriber;
use cloudbuild_notify::{NotifyConfig, Secrets, load_config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "notify_config.toml";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let file_logger = match file_logger_from_env() {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };
    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// `LOG_DIR` enables the log file; `LOG_MAX_FILES` and `LOG_ROTATION` tune it.
fn file_logger_from_env() -> Result<Option<FileLogger>, NotifyError> {
    let Some(dir) = std::env::var("LOG_DIR").ok().filter(|dir| !dir.is_empty()) else {
        return Ok(None);
    };

    let mut logger = FileLogger::new(PathBuf::from(dir));
    if let Some(max_files) = std::env::var("LOG_MAX_FILES").ok().and_then(|n| n.parse().ok()) {
        logger = logger.with_max_files(max_files);
    }
    if let Ok(rotation) = std::env::var("LOG_ROTATION") {
        logger = logger.with_rotation(parse_rotation(&rotation)?);
    }
    Ok(Some(logger))
}

async fn run() -> Result<(), NotifyError> {
    let config_path =
        std::env::var("NOTIFY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config: NotifyConfig = load_config(&config_path)?;
    let secrets = Secrets::from_env()?;
    info!("Using config at {:?}", config_path);

    let timeout = config.get_http_timeout();
    let github = GithubClient::new(
        &config.github.api_base,
        &config.github.owner,
        &secrets.github_token,
        timeout,
    )?;
    let chat = ChatNotifier::new(&secrets.hangout_url, timeout)?;

    let subscription = secrets
        .subscription_override
        .clone()
        .unwrap_or_else(|| config.subscription.clone());
    let shutdown_grace = config.get_shutdown_grace();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(config),
        Arc::new(github),
        Arc::new(chat),
    ));

    let subscriber =
        Subscriber::connect(&secrets.project_id, &subscription, dispatcher, shutdown_grace)
            .await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    info!("Starting to collect notifications from Cloud Build...");
    subscriber.run(shutdown).await?;
    info!("Shut down cleanly");
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown requested");
    shutdown.cancel();
}
