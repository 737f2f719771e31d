//! Worker pool: independently scheduled OS threads with numeric identities.
//!
//! Each worker runs one task closure `FnOnce(WorkerId) -> anyhow::Result<T>`
//! to completion. Errors and panics are captured at the worker boundary and
//! only surface when the worker is joined, either through its
//! [`WorkerHandle`] or through [`WorkerPool::join_all`] /
//! [`WorkerPool::wait_all`].
//!
//! Per-worker lifecycle:
//!
//! ```text
//! Spawned -> Running -> Completed -> Joined
//!                    \-> Failed ----/
//! ```

use crate::core::config::PoolConfig;
use crate::core::errors::{Result, WorkshareError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Identity of a worker, unique within a pool generation, starting at 1
pub type WorkerId = u64;

/// Worker lifecycle state, stored as an `AtomicU8`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum WorkerState {
    Spawned = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Joined = 4,
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkerState::Spawned,
            1 => WorkerState::Running,
            2 => WorkerState::Completed,
            3 => WorkerState::Failed,
            _ => WorkerState::Joined,
        }
    }
}

impl WorkerState {
    /// The task body has returned (or panicked)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Completed | WorkerState::Failed | WorkerState::Joined
        )
    }
}

enum TaskOutcome<T> {
    Value(T),
    Failed { message: String, panicked: bool },
}

enum ResultSlot<T> {
    Pending,
    Ready(TaskOutcome<T>),
    Consumed,
}

struct WorkerSlot<T> {
    id: WorkerId,
    generation: Uuid,
    spawned_at: DateTime<Utc>,
    state: AtomicU8,
    log_failures: bool,
    thread: Mutex<Option<JoinHandle<TaskOutcome<T>>>>,
    result: Mutex<ResultSlot<T>>,
}

impl<T> WorkerSlot<T> {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    fn lock_thread(&self) -> Result<MutexGuard<'_, Option<JoinHandle<TaskOutcome<T>>>>> {
        self.thread
            .lock()
            .map_err(|_| WorkshareError::lock_poisoned(format!("worker {} thread", self.id)))
    }

    fn lock_result(&self) -> Result<MutexGuard<'_, ResultSlot<T>>> {
        self.result
            .lock()
            .map_err(|_| WorkshareError::lock_poisoned(format!("worker {} result", self.id)))
    }
}

/// Handle to one spawned worker
///
/// Clones refer to the same worker; the pool keeps one clone for bulk joins.
pub struct WorkerHandle<T> {
    slot: Arc<WorkerSlot<T>>,
}

impl<T> Clone for WorkerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> std::fmt::Debug for WorkerHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.slot.id)
            .field("state", &self.slot.state())
            .finish()
    }
}

impl<T> WorkerHandle<T> {
    pub fn id(&self) -> WorkerId {
        self.slot.id
    }

    pub fn state(&self) -> WorkerState {
        self.slot.state()
    }

    /// True once the task body has returned; never blocks
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.slot.id,
            state: self.slot.state(),
            generation: self.slot.generation,
            spawned_at: self.slot.spawned_at,
        }
    }

    /// Block until the worker terminates
    ///
    /// Returns `WorkerFailure` if the task returned an error or panicked.
    /// A worker can be joined once; later calls fail with `InvalidState`.
    pub fn join(&self) -> Result<()> {
        let handle = self.slot.lock_thread()?.take().ok_or_else(|| {
            WorkshareError::invalid_state(
                "join",
                format!("worker {} has already been joined", self.slot.id),
            )
        })?;

        let outcome = match handle.join() {
            Ok(outcome) => outcome,
            // Only reachable if something outside the task body panicked
            Err(payload) => TaskOutcome::Failed {
                message: panic_message(payload.as_ref()),
                panicked: true,
            },
        };

        let failure = match &outcome {
            TaskOutcome::Value(_) => None,
            TaskOutcome::Failed { message, panicked } => {
                if self.slot.log_failures {
                    warn!(worker_id = self.slot.id, panicked, "Worker failed: {}", message);
                }
                Some(failure_error(self.slot.id, message, *panicked))
            }
        };

        *self.slot.lock_result()? = ResultSlot::Ready(outcome);
        self.slot.set_state(WorkerState::Joined);
        debug!(worker_id = self.slot.id, "Worker joined");

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Take the task's return value; allowed exactly once, after `join`
    pub fn take_result(&self) -> Result<T> {
        let mut slot = self.slot.lock_result()?;
        match std::mem::replace(&mut *slot, ResultSlot::Consumed) {
            ResultSlot::Pending => {
                *slot = ResultSlot::Pending;
                Err(WorkshareError::invalid_state(
                    "take_result",
                    format!("worker {} has not been joined", self.slot.id),
                ))
            }
            ResultSlot::Consumed => Err(WorkshareError::already_consumed(format!(
                "result of worker {}",
                self.slot.id
            ))),
            ResultSlot::Ready(TaskOutcome::Value(value)) => Ok(value),
            ResultSlot::Ready(TaskOutcome::Failed { message, panicked }) => {
                Err(failure_error(self.slot.id, &message, panicked))
            }
        }
    }

    /// `join` followed by `take_result`
    pub fn join_result(&self) -> Result<T> {
        self.join()?;
        self.take_result()
    }
}

fn failure_error(worker_id: WorkerId, message: &str, panicked: bool) -> WorkshareError {
    if panicked {
        WorkshareError::worker_panic(worker_id, message)
    } else {
        WorkshareError::worker_failure(worker_id, message)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked with a non-string payload".to_string()
    }
}

/// Snapshot of a tracked worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub state: WorkerState,
    pub generation: Uuid,
    pub spawned_at: DateTime<Utc>,
}

/// One failed worker in a [`JoinReport`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerFailureInfo {
    pub worker_id: WorkerId,
    pub message: String,
    pub panicked: bool,
}

/// Outcome of a bulk join
#[derive(Debug, Clone, Serialize)]
pub struct JoinReport {
    pub generation: Uuid,
    /// Workers joined by this call
    pub joined: usize,
    /// Tracked workers that had already been joined through their handle
    pub already_joined: usize,
    /// Failures ordered by worker id
    pub failures: Vec<WorkerFailureInfo>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JoinReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.joined + self.already_joined
    }

    /// The lowest-id failure as an error
    pub fn first_failure(&self) -> Option<WorkshareError> {
        self.failures
            .first()
            .map(|f| failure_error(f.worker_id, &f.message, f.panicked))
    }
}

struct Generation {
    id: Uuid,
    next_worker: WorkerId,
}

/// Spawns and tracks workers
pub struct WorkerPool<T = ()> {
    config: PoolConfig,
    workers: DashMap<WorkerId, WorkerHandle<T>>,
    generation: Mutex<Generation>,
}

impl<T> WorkerPool<T>
where
    T: Send + 'static,
{
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let generation = Uuid::new_v4();
        info!(
            %generation,
            workers = config.effective_workers(),
            prefix = %config.thread_name_prefix,
            "Worker pool created"
        );

        Ok(Self {
            config,
            workers: DashMap::new(),
            generation: Mutex::new(Generation {
                id: generation,
                next_worker: 1,
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock_generation(&self) -> Result<MutexGuard<'_, Generation>> {
        self.generation
            .lock()
            .map_err(|_| WorkshareError::lock_poisoned("pool_generation"))
    }

    /// Current generation id
    pub fn generation(&self) -> Result<Uuid> {
        Ok(self.lock_generation()?.id)
    }

    /// Launch one worker running `task(worker_id)`
    pub fn spawn<F>(&self, task: F) -> Result<WorkerHandle<T>>
    where
        F: FnOnce(WorkerId) -> anyhow::Result<T> + Send + 'static,
    {
        // Id allocation and registry insertion stay under the generation lock
        let mut generation = self.lock_generation()?;
        let id = generation.next_worker;

        let slot = Arc::new(WorkerSlot {
            id,
            generation: generation.id,
            spawned_at: Utc::now(),
            state: AtomicU8::new(WorkerState::Spawned as u8),
            log_failures: self.config.log_failures,
            thread: Mutex::new(None),
            result: Mutex::new(ResultSlot::Pending),
        });

        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.config.thread_name_prefix, id));
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let worker_slot = Arc::clone(&slot);
        let join_handle = builder
            .spawn(move || run_task(worker_slot, task))
            .map_err(|e| WorkshareError::io(format!("spawn worker {id}"), e))?;

        *slot.lock_thread()? = Some(join_handle);
        generation.next_worker += 1;

        let handle = WorkerHandle { slot };
        self.workers.insert(id, handle.clone());
        debug!(worker_id = id, generation = %generation.id, "Worker spawned");
        Ok(handle)
    }

    /// Launch `count` workers sharing one task function
    pub fn spawn_many<F>(&self, count: usize, task: F) -> Result<Vec<WorkerHandle<T>>>
    where
        F: Fn(WorkerId) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        if count == 0 {
            return Err(WorkshareError::configuration_field(
                "worker count must be greater than 0",
                "count",
            ));
        }

        let task = Arc::new(task);
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            let task = Arc::clone(&task);
            handles.push(self.spawn(move |id| task(id))?);
        }
        info!(count, "Spawned workers");
        Ok(handles)
    }

    /// Launch `config.effective_workers()` workers
    pub fn spawn_default<F>(&self, task: F) -> Result<Vec<WorkerHandle<T>>>
    where
        F: Fn(WorkerId) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.spawn_many(self.config.effective_workers(), task)
    }

    /// Tracked workers that have not been joined yet, ordered by id
    pub fn list(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = self
            .workers
            .iter()
            .map(|entry| entry.value().info())
            .filter(|info| info.state != WorkerState::Joined)
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn len(&self) -> usize {
        self.list().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join every tracked worker and report all failures
    ///
    /// Always waits for every worker, whatever the others did. When no
    /// worker is left tracked afterwards, the generation rolls over and
    /// worker ids restart at 1.
    pub fn wait_all(&self) -> JoinReport {
        let started_at = Utc::now();
        let mut handles: Vec<WorkerHandle<T>> = self
            .workers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        handles.sort_by_key(|h| h.id());

        let generation = handles
            .first()
            .map(|h| h.slot.generation)
            .or_else(|| self.generation().ok())
            .unwrap_or_else(Uuid::nil);

        let mut joined = 0;
        let mut already_joined = 0;
        let mut failures = Vec::new();

        for handle in &handles {
            match handle.join() {
                Ok(()) => joined += 1,
                Err(WorkshareError::InvalidState { .. }) => already_joined += 1,
                Err(WorkshareError::WorkerFailure {
                    worker_id,
                    message,
                    panicked,
                }) => {
                    joined += 1;
                    failures.push(WorkerFailureInfo {
                        worker_id,
                        message,
                        panicked,
                    });
                }
                Err(other) => {
                    joined += 1;
                    failures.push(WorkerFailureInfo {
                        worker_id: handle.id(),
                        message: other.to_string(),
                        panicked: false,
                    });
                }
            }
            self.workers.remove(&handle.id());
        }

        self.roll_generation();

        let report = JoinReport {
            generation,
            joined,
            already_joined,
            failures,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            joined = report.joined,
            already_joined = report.already_joined,
            failed = report.failures.len(),
            "Joined all workers"
        );
        report
    }

    /// [`wait_all`](Self::wait_all), then surface the lowest-id failure
    pub fn join_all(&self) -> Result<JoinReport> {
        let report = self.wait_all();
        match report.first_failure() {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    fn roll_generation(&self) {
        let Ok(mut generation) = self.lock_generation() else {
            return;
        };
        if !self.workers.is_empty() {
            return;
        }
        let previous = generation.id;
        generation.id = Uuid::new_v4();
        generation.next_worker = 1;
        debug!(%previous, next = %generation.id, "Pool generation rolled over");
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        let pending: Vec<WorkerHandle<T>> = self
            .workers
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|h| h.state() != WorkerState::Joined)
            .collect();
        if pending.is_empty() {
            return;
        }

        warn!(
            workers = pending.len(),
            "Worker pool dropped with unjoined workers, joining them"
        );
        for handle in pending {
            match handle.join() {
                Err(err @ WorkshareError::WorkerFailure { .. }) if !handle.slot.log_failures => {
                    warn!(worker_id = handle.id(), "Unjoined worker failed: {}", err);
                }
                _ => {}
            }
        }
    }
}

fn run_task<T, F>(slot: Arc<WorkerSlot<T>>, task: F) -> TaskOutcome<T>
where
    F: FnOnce(WorkerId) -> anyhow::Result<T>,
{
    let id = slot.id;
    let _span = info_span!("worker", worker_id = id).entered();
    slot.set_state(WorkerState::Running);

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task(id))) {
        Ok(Ok(value)) => TaskOutcome::Value(value),
        Ok(Err(err)) => TaskOutcome::Failed {
            message: format!("{err:#}"),
            panicked: false,
        },
        Err(payload) => TaskOutcome::Failed {
            message: panic_message(payload.as_ref()),
            panicked: true,
        },
    };

    match outcome {
        TaskOutcome::Value(_) => slot.set_state(WorkerState::Completed),
        TaskOutcome::Failed { .. } => slot.set_state(WorkerState::Failed),
    }
    outcome
}
