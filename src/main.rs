use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = evreg::config::Cli::parse();
    let cmd = cli.command.clone().unwrap_or(evreg::config::Command::Run);

    match cmd {
        evreg::config::Command::Run => run_server(cli.config).await,
        evreg::config::Command::Export => export_once(&cli.config),
    }
}

fn export_once(config: &evreg::config::Config) -> Result<()> {
    let store = evreg::store::StudentStore::load_or_init(&config.data_dir)?;
    let backup_dir = evreg::backup::prepare_backup_dir(&config.backup_dir, &config.data_dir);
    let snapshot_path = backup_dir.join(evreg::backup::SNAPSHOT_FILENAME);

    let records: Vec<_> = store
        .list_verified()
        .iter()
        .map(|record| record.to_flat_map())
        .collect();
    let text = evreg::export::render_snapshot(&records);
    evreg::store::write_atomic(&snapshot_path, text.as_bytes())?;

    info!(
        snapshot = %snapshot_path.display(),
        record_count = records.len(),
        "snapshot exported"
    );
    Ok(())
}

async fn run_server(config: evreg::config::Config) -> Result<()> {
    let students = Arc::new(Mutex::new(evreg::store::StudentStore::load_or_init(
        &config.data_dir,
    )?));

    let sweep_interval = Duration::from_secs(config.sweep_interval_minutes * 60);

    let otp_store = Arc::new(evreg::ttl_store::TtlStore::new());
    let _otp_sweeper = evreg::ttl_store::spawn_sweeper(otp_store.clone(), "otp", sweep_interval);
    let otp = Arc::new(evreg::otp::OtpGate::new(
        otp_store,
        Duration::from_secs(config.otp_ttl_minutes * 60),
    ));

    let pending_store = Arc::new(evreg::ttl_store::TtlStore::new());
    let _pending_sweeper =
        evreg::ttl_store::spawn_sweeper(pending_store.clone(), "pending", sweep_interval);
    let pending = Arc::new(evreg::pending::PendingRegistry::new(
        pending_store,
        Duration::from_secs(config.pending_ttl_minutes * 60),
    ));

    let mut backup_opts = evreg::backup::BackupSchedulerOptions::from_config(&config);
    backup_opts.backup_dir =
        evreg::backup::prepare_backup_dir(&backup_opts.backup_dir, &config.data_dir);
    let (backup, _backup_task) = evreg::backup::spawn_backup_scheduler(
        backup_opts,
        Arc::new(evreg::backup::StoreRecordSource::new(students.clone())),
    );

    let captcha_client = reqwest::Client::builder()
        .user_agent(format!("evreg/{}", evreg::version::VERSION))
        .timeout(Duration::from_secs(10))
        .build()?;
    let captcha = evreg::captcha::CaptchaVerifier::new(captcha_client, &config.recaptcha_secret);
    let mailer: Arc<dyn evreg::mailer::Mailer> = Arc::new(evreg::mailer::LogMailer);

    let app = evreg::http::build_router(
        config.clone(),
        students,
        otp,
        pending,
        backup.clone(),
        mailer,
        captcha,
    )
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive());

    info!(
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        "starting evreg"
    );
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    backup.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).compact().init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
