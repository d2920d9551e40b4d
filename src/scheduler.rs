//! Task lifecycle: start, stop and the self-rescheduling loops.
//!
//! The scheduler is the only writer of [`TaskState`]. Every run gets a fresh
//! [`CancellationToken`] and a generation number:
//!
//! - the token is checked after every suspend point, so once `stop` returns no
//!   further tick of that run is started;
//! - the generation guards every write back into the shared state, so a loop that
//!   outlives its run (a fetch still in flight at stop time) can never touch the
//!   state or cadence of the run that replaced it.
//!
//! `start` holds the state lock across the implicit stop and the new start, so
//! observers always see the old run's stop events before the new run's start events.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::delay;
use crate::events::{DelegatedLoop, LogOrigin, OutboundEvent};
use crate::fetch::{ActionOutcome, Fetcher};
use crate::metrics::{ACTIONS_TOTAL, TASKS_REJECTED_TOTAL, TASKS_STARTED_TOTAL, TASK_RUNNING};
use crate::task::{ReplicaPlan, TaskConfig, TaskMode, TaskRequest, TaskSnapshot, TaskState};

/// Reply to a start or stop command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Handle to the single task scheduler. Clones share the same task.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<TaskState>,
    broadcaster: Broadcaster,
    fetcher: Arc<dyn Fetcher>,
    generations: AtomicU64,
}

/// What a loop needs to know about the run it belongs to.
struct RunContext {
    generation: u64,
    config: TaskConfig,
    cancel: CancellationToken,
    started_at: Instant,
}

impl Scheduler {
    pub fn new(broadcaster: Broadcaster, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TaskState::new()),
                broadcaster,
                fetcher,
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcaster
    }

    /// Starts a task, superseding any running one.
    ///
    /// Must be called from within a Tokio runtime; the loop runs on a spawned task.
    pub fn start(&self, request: &TaskRequest) -> CommandResult {
        let mut state = self.inner.lock_state();
        self.inner.stop_locked(&mut state);

        let config = match request.validate() {
            Ok(config) => config,
            Err(e) => {
                TASKS_REJECTED_TOTAL.inc();
                warn!(error = %e, "Rejected start command");
                self.inner
                    .broadcaster
                    .log(LogOrigin::System, format!("Invalid parameters: {}", e));
                return CommandResult::failure(format!("Invalid parameters: {}", e));
            }
        };

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let started_at = state
            .begin(generation, config.clone(), cancel.clone())
            .started_at;

        TASK_RUNNING.set(1);
        TASKS_STARTED_TOTAL
            .with_label_values(&[config.mode.as_str()])
            .inc();
        info!(
            generation,
            mode = config.mode.as_str(),
            url = %config.url,
            min_delay_ms = config.min_delay_ms,
            max_delay_ms = config.max_delay_ms,
            "Task started"
        );

        let announcement = match config.mode {
            TaskMode::ServerDriven => format!("Server mode task started for {}", config.url),
            TaskMode::BrowserDelegated(plan) => format!(
                "Browser mode task started for {}: {} replica(s) per round, each closed after {}ms",
                config.url, plan.replica_count, plan.lifetime_ms
            ),
        };
        self.inner.broadcaster.log(LogOrigin::System, announcement);
        self.inner.broadcaster.status(true);

        let run = RunContext {
            generation,
            config,
            cancel,
            started_at,
        };
        tokio::spawn(Arc::clone(&self.inner).run_loop(run));

        CommandResult::success("Background task started successfully.")
    }

    /// Stops the running task. Stopping while idle is a silent success.
    pub fn stop(&self) -> CommandResult {
        let mut state = self.inner.lock_state();
        if !self.inner.stop_locked(&mut state) {
            debug!("Stop requested while idle");
        }
        CommandResult::success("Active task stopped.")
    }

    /// Stops whatever is running before the process exits.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        if self.inner.stop_locked(&mut state) {
            info!("Active task stopped for shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().is_running()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.inner.lock_state().snapshot()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        // TaskState is valid between any two statements, so a poisoned lock is usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ends the active run, if any, and announces it. Returns whether one ended.
    fn stop_locked(&self, state: &mut TaskState) -> bool {
        let Some(run) = state.end() else {
            return false;
        };

        run.cancel.cancel();
        TASK_RUNNING.set(0);
        info!(
            generation = run.generation,
            mode = run.config.mode.as_str(),
            actions_completed = run.actions_completed,
            "Task stopped"
        );

        self.broadcaster.log(
            LogOrigin::System,
            format!(
                "{} mode task stopped after {} action(s).",
                run.config.mode.as_str(),
                run.actions_completed
            ),
        );
        self.broadcaster.status(false);
        if let TaskMode::BrowserDelegated(_) = run.config.mode {
            self.broadcaster
                .publish(OutboundEvent::StopDelegatedLoop {});
        }
        true
    }

    async fn run_loop(self: Arc<Self>, run: RunContext) {
        let mut ordinal = 0u64;

        loop {
            if run.cancel.is_cancelled() {
                break;
            }
            ordinal += 1;

            match run.config.mode {
                TaskMode::ServerDriven => {
                    let result = self.fetcher.perform(&run.config.url).await;
                    self.finish_fetch(&run, ActionOutcome { ordinal, result });
                }
                TaskMode::BrowserDelegated(plan) => {
                    if !self.emit_instruction(&run, plan, ordinal) {
                        break;
                    }
                }
            }

            // A stop may have landed while the action was in flight.
            if run.cancel.is_cancelled() {
                break;
            }

            let pause = delay::next_duration(run.config.min_delay_ms, run.config.max_delay_ms);
            debug!(
                generation = run.generation,
                delay_ms = pause.as_millis() as u64,
                "Next tick scheduled"
            );
            tokio::select! {
                biased;
                _ = run.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        debug!(
            generation = run.generation,
            ticks = ordinal,
            "Task loop finished"
        );
    }

    /// Records and logs a fetch outcome. An outcome that arrives after its run was
    /// stopped is still logged but no longer counted.
    fn finish_fetch(&self, run: &RunContext, outcome: ActionOutcome) {
        let mut state = self.lock_state();
        if state.record_action(run.generation, outcome.ordinal) {
            ACTIONS_TOTAL
                .with_label_values(&[run.config.mode.as_str()])
                .inc();
        }

        self.broadcaster.log(
            LogOrigin::ServerLoop,
            format!(
                "#{} {} - {} (+{:.3}s)",
                outcome.ordinal,
                outcome.result,
                run.config.url,
                run.started_at.elapsed().as_secs_f64()
            ),
        );
    }

    /// Broadcasts one replica instruction, unless the run has already ended.
    fn emit_instruction(&self, run: &RunContext, plan: ReplicaPlan, ordinal: u64) -> bool {
        let mut state = self.lock_state();
        if !state.record_action(run.generation, ordinal) {
            return false;
        }
        ACTIONS_TOTAL
            .with_label_values(&[run.config.mode.as_str()])
            .inc();

        self.broadcaster.log(
            LogOrigin::BrowserOrchestration,
            format!(
                "#{} instructing observers to open {} replica(s) of {} for {}ms (+{:.3}s)",
                ordinal,
                plan.replica_count,
                run.config.url,
                plan.lifetime_ms,
                run.started_at.elapsed().as_secs_f64()
            ),
        );
        self.broadcaster
            .publish(OutboundEvent::StartDelegatedLoop(DelegatedLoop {
                url: run.config.url.clone(),
                min_delay: run.config.min_delay_ms,
                max_delay: run.config.max_delay_ms,
                replica_count: plan.replica_count,
                lifetime_ms: plan.lifetime_ms,
                ordinal,
            }));
        true
    }
}
