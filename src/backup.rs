use std::{future::Future, path::PathBuf, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{Mutex, RwLock, mpsc, oneshot},
    time::Instant,
};
use tracing::{info, warn};

use crate::{
    config::Config,
    export::{FlatRecord, render_snapshot},
    store::{StudentStore, write_atomic},
};

pub const SNAPSHOT_FILENAME: &str = "students_backup.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    Running,
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LastRunResult {
    None,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerRunState {
    pub phase: SchedulerPhase,
    pub last_result: LastRunResult,
    pub next_fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceBackupOutcome {
    /// The run will start as soon as the scheduler loop picks it up; the
    /// caller does not wait for it to finish.
    Accepted,
    /// A run is already executing (or already queued); nothing was started.
    Busy,
}

impl ForceBackupOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Busy => "busy",
        }
    }
}

/// Snapshot-file facts computed from the file itself at call time, so the
/// answer stays correct across process restarts.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub exists: bool,
    pub path: String,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub record_count: usize,
    pub next_run_eta_hours: f64,
}

pub type RecordsFuture = Pin<Box<dyn Future<Output = anyhow::Result<Vec<FlatRecord>>> + Send>>;

/// Where a backup run gets its records. The production impl queries the
/// durable student store; tests substitute fakes.
pub trait RecordSource: Send + Sync {
    fn list_verified(&self) -> RecordsFuture;
}

pub struct StoreRecordSource {
    store: Arc<Mutex<StudentStore>>,
}

impl StoreRecordSource {
    pub fn new(store: Arc<Mutex<StudentStore>>) -> Self {
        Self { store }
    }
}

impl RecordSource for StoreRecordSource {
    fn list_verified(&self) -> RecordsFuture {
        let store = self.store.clone();
        Box::pin(async move {
            let store = store.lock().await;
            Ok(store
                .list_verified()
                .iter()
                .map(|record| record.to_flat_map())
                .collect())
        })
    }
}

#[derive(Debug, Clone)]
pub struct BackupSchedulerOptions {
    pub backup_dir: PathBuf,
    pub interval: Duration,
    pub retry_interval: Duration,
    pub startup_delay: Duration,
    pub run_timeout: Duration,
}

impl BackupSchedulerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backup_dir: config.backup_dir.clone(),
            interval: Duration::from_secs(config.backup_interval_hours * 3600),
            retry_interval: Duration::from_secs(config.backup_retry_minutes * 60),
            startup_delay: Duration::from_secs(config.backup_startup_delay_minutes * 60),
            run_timeout: Duration::from_secs(config.backup_run_timeout_secs),
        }
    }
}

/// Ensures the backup directory exists; falls back to `fallback_dir` when it
/// cannot be created. Never fatal.
pub fn prepare_backup_dir(backup_dir: &PathBuf, fallback_dir: &PathBuf) -> PathBuf {
    match std::fs::create_dir_all(backup_dir) {
        Ok(()) => backup_dir.clone(),
        Err(err) => {
            warn!(
                backup_dir = %backup_dir.display(),
                fallback_dir = %fallback_dir.display(),
                error = %err,
                "cannot create backup directory, using fallback"
            );
            fallback_dir.clone()
        }
    }
}

#[derive(Clone)]
pub struct BackupHandle {
    state: Arc<RwLock<SchedulerRunState>>,
    force_tx: mpsc::Sender<()>,
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    snapshot_path: PathBuf,
}

impl BackupHandle {
    /// Requests an out-of-band run. Returns without waiting for the run
    /// itself; a run already executing yields `Busy`, never a queued second
    /// writer.
    pub async fn force(&self) -> ForceBackupOutcome {
        if self.state.read().await.phase == SchedulerPhase::Running {
            return ForceBackupOutcome::Busy;
        }
        match self.force_tx.try_send(()) {
            Ok(()) => ForceBackupOutcome::Accepted,
            Err(_) => ForceBackupOutcome::Busy,
        }
    }

    pub async fn run_state(&self) -> SchedulerRunState {
        *self.state.read().await
    }

    pub fn snapshot_path(&self) -> &PathBuf {
        &self.snapshot_path
    }

    /// Inspects the snapshot file on disk; nothing here comes from the
    /// scheduler's memory except the next-fire estimate.
    pub async fn info(&self) -> BackupInfo {
        let next_fire_at = self.state.read().await.next_fire_at;
        let eta = (next_fire_at - Utc::now()).num_seconds().max(0) as f64 / 3600.0;

        let path_display = self.snapshot_path.display().to_string();
        let Ok(meta) = tokio::fs::metadata(&self.snapshot_path).await else {
            return BackupInfo {
                exists: false,
                path: path_display,
                size_bytes: 0,
                last_modified: None,
                record_count: 0,
                next_run_eta_hours: eta,
            };
        };
        let record_count = match tokio::fs::read_to_string(&self.snapshot_path).await {
            Ok(text) => text.lines().count().saturating_sub(1),
            Err(_) => 0,
        };
        BackupInfo {
            exists: true,
            path: path_display,
            size_bytes: meta.len(),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            record_count,
            next_run_eta_hours: eta,
        }
    }

    pub async fn shutdown(&self) {
        let tx = self.shutdown.lock().await.take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }
}

/// Spawns the recurring backup loop: one long-lived task reused across runs.
/// The loop never dies on a failed attempt; failures transition to `Backoff`
/// and are retried at the shorter interval.
pub fn spawn_backup_scheduler(
    opts: BackupSchedulerOptions,
    source: Arc<dyn RecordSource>,
) -> (BackupHandle, tokio::task::JoinHandle<()>) {
    let snapshot_path = opts.backup_dir.join(SNAPSHOT_FILENAME);
    let state = Arc::new(RwLock::new(SchedulerRunState {
        phase: SchedulerPhase::Idle,
        last_result: LastRunResult::None,
        next_fire_at: Utc::now()
            + chrono::TimeDelta::from_std(opts.startup_delay).unwrap_or_default(),
    }));
    // Capacity 1: at most one pending manual request; a second force while
    // one is queued reports Busy.
    let (force_tx, mut force_rx) = mpsc::channel::<()>(1);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let handle = BackupHandle {
        state: state.clone(),
        force_tx,
        shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
        snapshot_path: snapshot_path.clone(),
    };

    let task = tokio::spawn(async move {
        let mut deadline = Instant::now() + opts.startup_delay;
        info!(
            snapshot = %snapshot_path.display(),
            startup_delay_secs = opts.startup_delay.as_secs(),
            interval_secs = opts.interval.as_secs(),
            "backup scheduler started"
        );
        loop {
            let trigger = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => "schedule",
                Some(()) = force_rx.recv() => "manual",
                _ = &mut shutdown_rx => break,
            };

            {
                let mut state = state.write().await;
                state.phase = SchedulerPhase::Running;
            }

            let started_at = Utc::now();
            let outcome = tokio::time::timeout(
                opts.run_timeout,
                run_backup_once(source.as_ref(), &snapshot_path),
            )
            .await
            .map_err(|_| anyhow::anyhow!("backup run timed out"))
            .and_then(|res| res);

            let now = Utc::now();
            let mut state = state.write().await;
            match outcome {
                Ok(record_count) => {
                    state.phase = SchedulerPhase::Idle;
                    state.last_result = LastRunResult::Success;
                    state.next_fire_at =
                        now + chrono::TimeDelta::from_std(opts.interval).unwrap_or_default();
                    deadline = Instant::now() + opts.interval;
                    info!(
                        trigger,
                        record_count,
                        duration_ms = (now - started_at).num_milliseconds(),
                        next_fire_at = %state.next_fire_at.to_rfc3339(),
                        "backup run succeeded"
                    );
                }
                Err(err) => {
                    state.phase = SchedulerPhase::Backoff;
                    state.last_result = LastRunResult::Failure;
                    state.next_fire_at =
                        now + chrono::TimeDelta::from_std(opts.retry_interval).unwrap_or_default();
                    deadline = Instant::now() + opts.retry_interval;
                    warn!(
                        trigger,
                        error = %err,
                        retry_secs = opts.retry_interval.as_secs(),
                        "backup run failed, will retry at short interval"
                    );
                }
            }
        }
        info!("backup scheduler stopped");
    });

    (handle, task)
}

/// One attempt: query, render, atomically replace the snapshot file. A
/// failure at any step leaves the previous snapshot untouched.
async fn run_backup_once(
    source: &dyn RecordSource,
    snapshot_path: &PathBuf,
) -> anyhow::Result<usize> {
    let records = source.list_verified().await?;
    let text = render_snapshot(&records);
    write_atomic(snapshot_path, text.as_bytes())?;
    Ok(records.len())
}
