use crate::{
    config::RunnerConfig,
    error::{AutomationError, Result},
    events::{Notification, NotificationSink, NullSink},
    sequencer::AssignmentFlow,
    store::BatchStore,
    types::{Outcome, ResumeStatus, RunSettings, WorkItem},
    Page, RunContext,
};
use std::sync::{Arc, Mutex};

/// Drives the persisted batch one item per page load.
///
/// The runner keeps no progress in memory. Every [`resume()`](Self::resume)
/// reads the [`BatchStore`], processes at most the queue head, records the
/// outcome, and reloads the page when more work remains. The host calls
/// [`on_page_load()`](Self::on_page_load) from its load hook so the next
/// item starts in a fresh page.
///
/// # Example
///
/// ```ignore
/// let config = RunnerConfig::builder()
///     .with_db_path(PathBuf::from("batch.db"))
///     .build();
///
/// let runner = BatchRunner::open(Arc::new(page), config)?
///     .with_notifier(Arc::new(app_handle.clone()));
///
/// // From the control surface:
/// runner.submit(items, settings).await?;
///
/// // In the page-load hook:
/// runner.on_page_load().await?;
/// ```
pub struct BatchRunner<P: Page> {
    page: Arc<P>,
    store: BatchStore,
    config: RunnerConfig,
    notifier: Arc<dyn NotificationSink>,
    active: Mutex<Option<RunContext>>,
    run_lock: tokio::sync::Mutex<()>,
}

impl<P: Page> BatchRunner<P> {
    pub fn new(page: Arc<P>, store: BatchStore, config: RunnerConfig) -> Self {
        Self {
            page,
            store,
            config,
            notifier: Arc::new(NullSink),
            active: Mutex::new(None),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open the store at `config.db_path` and build a runner over it.
    pub fn open(page: Arc<P>, config: RunnerConfig) -> Result<Self> {
        let store = BatchStore::open(config.db_path.as_deref())?;
        Ok(Self::new(page, store, config))
    }

    /// Send progress notifications to `notifier` instead of dropping them.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &BatchStore {
        &self.store
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(&notification);
    }

    /// Replace any persisted batch with `items` and start on the first one.
    ///
    /// A run already in flight is cancelled and allowed to unwind first.
    pub async fn submit(&self, items: Vec<WorkItem>, settings: RunSettings) -> Result<ResumeStatus> {
        self.cancel();
        let guard = self.run_lock.lock().await;
        tracing::info!(items = items.len(), "submitting batch");
        self.store.replace(items, settings)?;
        self.resume_locked(guard).await
    }

    /// Start on whatever the store holds, cancelling a run in flight.
    pub async fn start(&self) -> Result<ResumeStatus> {
        self.cancel();
        let guard = self.run_lock.lock().await;
        self.resume_locked(guard).await
    }

    /// Idempotent re-entry point. Processes at most the queue head.
    ///
    /// Returns [`ResumeStatus::Busy`] without waiting if another transaction
    /// holds the page.
    pub async fn resume(&self) -> Result<ResumeStatus> {
        let Ok(guard) = self.run_lock.try_lock() else {
            tracing::debug!("resume skipped, a run is already in flight");
            return Ok(ResumeStatus::Busy);
        };
        self.resume_locked(guard).await
    }

    /// Let the page's own startup settle, then resume.
    pub async fn on_page_load(&self) -> Result<ResumeStatus> {
        tokio::time::sleep(self.config.load_settle).await;
        self.resume().await
    }

    async fn resume_locked(&self, _guard: tokio::sync::MutexGuard<'_, ()>) -> Result<ResumeStatus> {
        let state = self.store.load()?;
        if !state.is_runnable() {
            return Ok(ResumeStatus::Idle);
        }

        let url = self.page.current_url();
        if !url.contains(&self.config.listing_url) {
            tracing::info!(%url, "not on the assignments listing, waiting for navigation");
            return Ok(ResumeStatus::WrongPage);
        }

        let (Some(item), Some(settings)) = (state.queue.first().cloned(), state.settings.clone())
        else {
            let error = AutomationError::Other("queued batch has no settings".into());
            self.notify(Notification::RunFailed {
                text: error.to_string(),
            });
            return Err(error);
        };

        self.notify(Notification::status(format!(
            "Creating assignment {} of {}",
            state.position(),
            state.total_count
        )));

        let run = self.begin_run();
        tracing::info!(
            run_id = %run.run_id,
            item = %item.identifier,
            position = state.position(),
            total = state.total_count,
            "processing queue head"
        );
        let flow = AssignmentFlow::new(
            self.page.as_ref(),
            &self.config,
            run.poller(self.config.poll_interval),
        );
        let outcome = flow.run(&item, &settings).await;
        self.end_run(&run);

        self.apply_outcome(&item, &outcome)?;
        Ok(ResumeStatus::Processed(outcome))
    }

    fn apply_outcome(&self, item: &WorkItem, outcome: &Outcome) -> Result<()> {
        match outcome {
            Outcome::Completed
            | Outcome::SkippedNotFound { .. }
            | Outcome::SkippedSubstepFailed { .. } => {
                let Some(remaining) = self.store.pop_head(item)? else {
                    tracing::info!(
                        item = %item.identifier,
                        "batch was stopped or replaced during the item, leaving it alone"
                    );
                    return Ok(());
                };

                if let Outcome::SkippedNotFound { reason }
                | Outcome::SkippedSubstepFailed { reason } = outcome
                {
                    tracing::warn!(item = %item.identifier, %reason, "item skipped");
                    self.notify(Notification::ItemSkipped {
                        text: format!("Skipped {}: {}", item.identifier, reason),
                    });
                }

                if remaining == 0 {
                    self.store.clear()?;
                    tracing::info!("batch complete");
                    self.notify(Notification::BatchComplete);
                } else {
                    tracing::debug!(remaining, "reloading for the next item");
                    self.page.reload();
                }
            }
            Outcome::Cancelled => {
                tracing::info!(item = %item.identifier, "run cancelled, item stays queued");
            }
            Outcome::Fatal { error } => {
                tracing::error!(item = %item.identifier, %error, "batch halted");
                self.notify(Notification::RunFailed {
                    text: format!("Stopped at {}: {}", item.identifier, error),
                });
            }
        }
        Ok(())
    }

    /// Run one item outside the queue. Cancels anything in flight first and
    /// never touches the persisted batch.
    pub async fn run_single(&self, item: WorkItem, settings: RunSettings) -> Result<Outcome> {
        self.cancel();
        let _guard = self.run_lock.lock().await;

        let url = self.page.current_url();
        if !url.contains(&self.config.listing_url) {
            return Err(AutomationError::WrongPage(url));
        }

        let run = self.begin_run();
        tracing::info!(run_id = %run.run_id, item = %item.identifier, "single-shot run");
        let flow = AssignmentFlow::new(
            self.page.as_ref(),
            &self.config,
            run.poller(self.config.poll_interval),
        );
        let outcome = flow.run(&item, &settings).await;
        self.end_run(&run);
        Ok(outcome)
    }

    /// Cancel the run in flight, if any. The persisted queue is untouched,
    /// so the same item is picked up again by the next `resume()`.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.as_ref() {
            Some(run) => {
                tracing::info!(run_id = %run.run_id, "cancelling run");
                run.cancel();
                true
            }
            None => false,
        }
    }

    /// Operator stop: cancel the run in flight, discard remaining work and pause.
    pub fn stop(&self) -> Result<()> {
        self.cancel();
        self.store.stop()?;
        tracing::info!("batch stopped by operator");
        self.notify(Notification::status("Stopped."));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .map(|active| active.is_some())
            .unwrap_or(false)
    }

    fn begin_run(&self) -> RunContext {
        let run = RunContext::new();
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = active.replace(run.clone()) {
            previous.cancel();
        }
        run
    }

    fn end_run(&self, run: &RunContext) {
        let elapsed_ms = (chrono::Utc::now() - run.started_at).num_milliseconds();
        tracing::debug!(run_id = %run.run_id, elapsed_ms, "run finished");
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_ref().map(|r| r.run_id == run.run_id).unwrap_or(false) {
            *active = None;
        }
    }
}
