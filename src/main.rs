use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use shelfsync::config::{Cli, Command, Config, SyncArgs, default_config_path};
use shelfsync::error::SyncError;
use shelfsync::handler::AppState;
use shelfsync::routes::routes;
use shelfsync::runner::{ConfiguredLauncher, SyncLauncher};
use shelfsync::sync::RunAborted;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const EXIT_FATAL: u8 = 1;
const EXIT_AUTH: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = args
        .config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    let mut cfg = match Config::new(&config_path.to_string_lossy()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, path = ?config_path, "failed to load config file");
            eprintln!("failed to load config {}: {}", config_path.display(), e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match args.command.unwrap_or(Command::Sync(SyncArgs::default())) {
        Command::Sync(sync_args) => {
            cfg.apply_sync_args(&sync_args);
            run_once(cfg).await
        }
        Command::Check => check(cfg).await,
        Command::Serve { port } => {
            if let Some(port) = port {
                cfg.server.port = port;
            }
            serve(cfg).await
        }
    }
}

fn exit_code_for(error: &SyncError) -> ExitCode {
    match error {
        SyncError::AuthExpired { .. } => ExitCode::from(EXIT_AUTH),
        _ => ExitCode::from(EXIT_FATAL),
    }
}

fn report_fatal(error: &SyncError) {
    match error {
        SyncError::AuthExpired { service, .. } => {
            eprintln!("credential expired for {}: {}", service, error);
        }
        _ => eprintln!("sync failed: {}", error),
    }
    if let Some(hint) = error.hint() {
        eprintln!("  to fix: {}", hint);
    }
}

async fn run_once(cfg: Config) -> ExitCode {
    let launcher = ConfiguredLauncher::new(cfg);
    match launcher.launch().await {
        Ok(report) => {
            println!("{}", report);
            for item in &report.errors {
                println!("  failed: {}: {}", item.title, item.message);
            }
            ExitCode::SUCCESS
        }
        Err(RunAborted { error, report }) => {
            println!("{}", report);
            report_fatal(&error);
            exit_code_for(&error)
        }
    }
}

async fn check(cfg: Config) -> ExitCode {
    let launcher = ConfiguredLauncher::new(cfg);
    let result = match launcher.driver() {
        Ok(driver) => driver.check().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(mapping) => {
            println!("credentials present for {}; notion properties:", launcher.source_label());
            for (name, kind) in mapping {
                println!("  {:<20} {}", name, kind);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            report_fatal(&e);
            exit_code_for(&e)
        }
    }
}

async fn serve(cfg: Config) -> ExitCode {
    tracing::info!("shelfsync.svc starting");

    let address = format!("0.0.0.0:{}", cfg.server.port);
    let schedule = cfg.server.schedule_interval_minutes.filter(|m| *m > 0);
    let state = AppState::new(
        Arc::new(ConfiguredLauncher::new(cfg.clone())),
        cfg.server.api_key.clone(),
    );
    let cancellation_token = CancellationToken::new();

    if let Some(minutes) = schedule {
        let scheduled = state.clone();
        let token = cancellation_token.clone();
        tracing::info!(minutes, "scheduled sync enabled");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(minutes * 60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match scheduled.execute_run("schedule").await {
                            None => tracing::info!("previous sync still running, skipping scheduled run"),
                            Some(Ok(report)) => tracing::info!(summary = %report, "scheduled sync finished"),
                            Some(Err(aborted)) => tracing::error!(error = %aborted.error, "scheduled sync aborted"),
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::info!("sync scheduler shutting down");
                        break;
                    }
                }
            }
        });
    }

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "failed to setup tcp listener");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    tracing::info!("shelfsync.svc running on {}", &address);
    let app = routes(state);
    let shutdown = cancellation_token.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl+c signal received, preparing to shutdown");
            }
            shutdown.cancel();
        })
        .await;

    cancellation_token.cancel();
    if let Err(err) = result {
        tracing::error!(error = %err, "server error");
        return ExitCode::from(EXIT_FATAL);
    }
    tracing::info!("shelfsync.svc going off, graceful shutdown complete");
    ExitCode::SUCCESS
}
