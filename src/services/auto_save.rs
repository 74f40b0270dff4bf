//! Debounced background persistence
//!
//! `AutoSave` watches snapshots pushed through `update`, waits for a quiet
//! period, and hands the latest snapshot to a `SaveHandler`. An interval
//! timer retries independently. At most one save runs at a time and a
//! snapshot equal to the last saved one is never written again.

use crate::core::{Project, ProjectDraft};
use async_trait::async_trait;
use color_eyre::{Report, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Persistence callback plus lifecycle notifications
#[async_trait]
pub trait SaveHandler<T>: Send + Sync {
    async fn save(&self, snapshot: &T) -> Result<()>;

    fn on_save_start(&self) {}

    fn on_save_success(&self) {}

    fn on_save_error(&self, _error: &Report) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSaveOptions {
    pub enabled: bool,
    pub debounce: Duration,
    pub interval: Duration,
}

impl Default for AutoSaveOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: Duration::from_secs(2),
            interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InFlight,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Failed,
    Skipped(SkipReason),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the in-flight flag even if the save future is dropped
struct SavingGuard<'a>(&'a AtomicBool);

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared<T> {
    handler: Arc<dyn SaveHandler<T>>,
    current: Mutex<T>,
    last_saved: Mutex<T>,
    saving: AtomicBool,
    enabled: AtomicBool,
}

impl<T> Shared<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    async fn save(&self, force: bool) -> SaveOutcome {
        if !force && !self.enabled.load(Ordering::Acquire) {
            return SaveOutcome::Skipped(SkipReason::Disabled);
        }
        if self
            .saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("save already in flight; skipping");
            return SaveOutcome::Skipped(SkipReason::InFlight);
        }
        let _guard = SavingGuard(&self.saving);

        let snapshot = lock(&self.current).clone();
        if !force && *lock(&self.last_saved) == snapshot {
            return SaveOutcome::Skipped(SkipReason::Unchanged);
        }

        self.handler.on_save_start();
        match self.handler.save(&snapshot).await {
            Ok(()) => {
                *lock(&self.last_saved) = snapshot;
                debug!(forced = force, "snapshot saved");
                self.handler.on_save_success();
                SaveOutcome::Saved
            }
            Err(err) => {
                warn!(error = %err, "auto-save failed");
                self.handler.on_save_error(&err);
                SaveOutcome::Failed
            }
        }
    }
}

/// Debounce and interval driven saver for snapshots of type `T`
pub struct AutoSave<T> {
    shared: Arc<Shared<T>>,
    options: AutoSaveOptions,
    debounce: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl<T> AutoSave<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Start the coordinator. Must be called inside a tokio runtime.
    ///
    /// `initial` counts as already saved.
    pub fn spawn(initial: T, handler: Arc<dyn SaveHandler<T>>, options: AutoSaveOptions) -> Self {
        let shared = Arc::new(Shared {
            handler,
            current: Mutex::new(initial.clone()),
            last_saved: Mutex::new(initial),
            saving: AtomicBool::new(false),
            enabled: AtomicBool::new(options.enabled),
        });
        let shutdown = CancellationToken::new();

        let ticker_shared = Arc::clone(&shared);
        let ticker_shutdown = shutdown.clone();
        let period = options.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker_shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        ticker_shared.save(false).await;
                    }
                }
            }
        });

        Self {
            shared,
            options,
            debounce: Mutex::new(None),
            shutdown,
        }
    }

    /// Record the latest snapshot and restart the debounce timer if it differs
    pub fn update(&self, snapshot: T) {
        let changed = *lock(&self.shared.last_saved) != snapshot;
        *lock(&self.shared.current) = snapshot;
        if changed && self.shared.enabled.load(Ordering::Acquire) {
            self.schedule();
        }
    }

    fn schedule(&self) {
        let token = self.shutdown.child_token();
        if let Some(previous) = lock(&self.debounce).replace(token.clone()) {
            previous.cancel();
        }

        let shared = Arc::clone(&self.shared);
        let delay = self.options.debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    shared.save(false).await;
                }
            }
        });
    }

    /// The guarded save routine used by both timers
    pub async fn save_if_changed(&self) -> SaveOutcome {
        self.shared.save(false).await
    }

    /// Save now, even if nothing changed. Still refuses to overlap a save.
    pub async fn force_save(&self) -> SaveOutcome {
        self.shared.save(true).await
    }

    pub fn is_saving(&self) -> bool {
        self.shared.saving.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
        if !enabled {
            if let Some(pending) = lock(&self.debounce).take() {
                pending.cancel();
            }
        }
    }

    /// The snapshot most recently persisted
    pub fn last_saved(&self) -> T {
        lock(&self.shared.last_saved).clone()
    }

    /// Stop both timers. A save already running finishes.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl<T> Drop for AutoSave<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Writes drafts back into a project JSON file
pub struct ProjectFileSaver {
    path: PathBuf,
    project: Mutex<Project>,
}

impl ProjectFileSaver {
    pub fn new(path: impl Into<PathBuf>, project: Project) -> Self {
        Self {
            path: path.into(),
            project: Mutex::new(project),
        }
    }

    pub fn project(&self) -> Project {
        lock(&self.project).clone()
    }
}

#[async_trait]
impl SaveHandler<ProjectDraft> for ProjectFileSaver {
    async fn save(&self, snapshot: &ProjectDraft) -> Result<()> {
        let raw = {
            let mut project = lock(&self.project);
            project.apply_draft(snapshot);
            serde_json::to_string_pretty(&*project)?
        };
        tokio::fs::write(&self.path, raw).await?;
        debug!(path = %self.path.display(), "project written");
        Ok(())
    }
}
