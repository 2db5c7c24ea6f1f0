//! Structured concurrency: asynchronous tasks on a bounded worker pool.
//!
//! Futures are eagerly-submitted computations returning a value; Jobs are
//! fire-and-forget with `join` returning Unit. Both count against the global
//! active-task quota. Each worker thread lazily builds one child interpreter
//! from the engine's shared state and reuses it for every task it runs; no
//! mutable interpreter state crosses threads.

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::{
    engine::EngineShared,
    error::{ErrorKind, Exception, RunError, RunResult},
    interp::Interp,
    invoke::{self, CallArgs},
    value::Value,
};

/// Which handle shape a task was created as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Future,
    Job,
}

/// The work a pending task will run.
#[derive(Debug)]
struct TaskPayload {
    callable: Value,
    args: Vec<Value>,
}

#[derive(Debug)]
enum TaskState {
    /// Submitted but not yet picked up by a worker.
    Pending(TaskPayload),
    Running,
    Done(Value),
    Failed(Exception),
    /// Cancelled before a worker started it.
    Cancelled,
}

impl TaskState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_) | Self::Cancelled)
    }
}

/// A Future or Job handle.
///
/// Cancellation sets the flag the running interpreter polls at loop
/// back-edges and host-call boundaries; a task that has not started will not
/// start. Completion state is idempotent: `get` after completion keeps
/// returning the same value.
pub struct TaskHandle {
    kind: TaskKind,
    state: Mutex<TaskState>,
    done: Condvar,
    cancelled: Arc<AtomicBool>,
    /// The engine's global active-task counter, decremented exactly once at
    /// the terminal transition.
    active: Arc<AtomicUsize>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("kind", &self.kind)
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Blocks until completion and returns the task's value.
    pub fn get(&self) -> Result<Value, Exception> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                TaskState::Done(value) => return Ok(value.clone()),
                TaskState::Failed(exc) => return Err(exc.clone()),
                TaskState::Cancelled => {
                    return Err(Exception::new(ErrorKind::Interrupted, "task was cancelled"));
                }
                _ => self.done.wait(&mut state),
            }
        }
    }

    /// Like [`TaskHandle::get`], failing with `Timeout` past the deadline.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Value, Exception> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_terminal() {
            let now = Instant::now();
            if now >= deadline {
                return Err(Exception::new(
                    ErrorKind::Timeout,
                    format!("get timed out after {}ms", timeout.as_millis()),
                ));
            }
            let _ = self.done.wait_for(&mut state, deadline - now);
        }
        drop(state);
        self.get()
    }

    /// Blocks until completion. Failures surface here; cancellation before
    /// start joins as Unit.
    pub fn join(&self) -> Result<(), Exception> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                TaskState::Done(_) | TaskState::Cancelled => return Ok(()),
                TaskState::Failed(exc) => return Err(exc.clone()),
                _ => self.done.wait(&mut state),
            }
        }
    }

    /// Requests cancellation. A task that has not started will not start; a
    /// running task observes the flag at its next guard boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        let mut state = self.state.lock();
        if matches!(*state, TaskState::Pending(_)) {
            *state = TaskState::Cancelled;
            self.active.fetch_sub(1, Ordering::AcqRel);
            self.done.notify_all();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::Relaxed) && !self.state.lock().is_terminal()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.lock().is_terminal()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || matches!(*self.state.lock(), TaskState::Cancelled)
    }
}

/// The bounded worker pool executing Futures and Jobs.
pub struct WorkerPool {
    sender: Sender<Arc<TaskHandle>>,
    size: usize,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool").field("size", &self.size).finish()
    }
}

impl WorkerPool {
    /// Spawns `size` workers over the engine's shared state.
    ///
    /// Workers hold only a weak reference to the engine; dropping the engine
    /// disconnects the channel and the workers exit.
    #[must_use]
    pub(crate) fn new(shared: &Arc<EngineShared>, size: usize) -> Arc<Self> {
        let size = size.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Arc<TaskHandle>>();
        for index in 0..size {
            let receiver: Receiver<Arc<TaskHandle>> = receiver.clone();
            let weak: Weak<EngineShared> = Arc::downgrade(shared);
            let builder = thread::Builder::new().name(format!("nova-worker-{index}"));
            let spawned = builder.spawn(move || worker_loop(index, &receiver, &weak));
            if let Err(err) = spawned {
                log::warn!("failed to spawn worker {index}: {err}");
            }
        }
        Arc::new(Self { sender, size })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    fn submit(&self, handle: Arc<TaskHandle>) {
        if self.sender.send(handle).is_err() {
            log::warn!("worker pool disconnected; task dropped");
        }
    }
}

fn worker_loop(index: usize, receiver: &Receiver<Arc<TaskHandle>>, weak: &Weak<EngineShared>) {
    log::debug!("worker {index} started");
    let mut interp: Option<Interp> = None;
    while let Ok(handle) = receiver.recv() {
        let Some(shared) = weak.upgrade() else { break };
        let interp = interp.get_or_insert_with(|| Interp::new(shared.clone()));
        run_task(interp, &handle);
    }
    log::debug!("worker {index} stopped");
}

fn run_task(interp: &mut Interp, handle: &Arc<TaskHandle>) {
    let payload = {
        let mut state = handle.state.lock();
        match std::mem::replace(&mut *state, TaskState::Running) {
            TaskState::Pending(payload) => {
                if handle.cancelled.load(Ordering::Relaxed) {
                    *state = TaskState::Cancelled;
                    handle.active.fetch_sub(1, Ordering::AcqRel);
                    handle.done.notify_all();
                    None
                } else {
                    Some(payload)
                }
            }
            other => {
                // already terminal (e.g. cancelled between send and recv)
                *state = other;
                None
            }
        }
    };
    let Some(payload) = payload else { return };

    interp.cancel = Some(handle.cancelled.clone());
    interp.guards.reset();
    let result = invoke::call_value(interp, &payload.callable, CallArgs::positional(payload.args));
    interp.cancel = None;

    let mut state = handle.state.lock();
    *state = match result {
        Ok(value) => TaskState::Done(value),
        Err(err) => TaskState::Failed(err.into_exception()),
    };
    handle.active.fetch_sub(1, Ordering::AcqRel);
    handle.done.notify_all();
}

/// Submits a callable to the worker pool as a Future or Job.
///
/// Creation increments the global active-task counter; exceeding the policy
/// quota fails with `ResourceLimit` and rolls the counter back.
pub(crate) fn spawn(
    interp: &mut Interp,
    kind: TaskKind,
    callable: Value,
    args: Vec<Value>,
) -> RunResult<Value> {
    let shared = interp.shared.clone();
    let limit = interp.guards.policy.max_async_tasks;
    let active = shared.active_tasks.fetch_add(1, Ordering::AcqRel) + 1;
    if limit != 0 && active > limit as usize {
        shared.active_tasks.fetch_sub(1, Ordering::AcqRel);
        return Err(RunError::raise(
            ErrorKind::ResourceLimit,
            format!("async task quota exceeded: {limit}"),
        ));
    }

    let handle = Arc::new(TaskHandle {
        kind,
        state: Mutex::new(TaskState::Pending(TaskPayload { callable, args })),
        done: Condvar::new(),
        cancelled: Arc::new(AtomicBool::new(false)),
        active: shared.active_tasks.clone(),
    });
    log::trace!("spawning {kind:?}; {active} task(s) active");
    EngineShared::pool(&shared).submit(handle.clone());

    Ok(match kind {
        TaskKind::Future => Value::Future(handle),
        TaskKind::Job => Value::Job(handle),
    })
}

/// Built-in methods on Future and Job values.
pub(crate) fn task_method(
    interp: &mut Interp,
    task: &Arc<TaskHandle>,
    is_job: bool,
    name: &str,
    args: CallArgs,
) -> RunResult<Value> {
    match name {
        "get" if !is_job => {
            invoke::host_boundary(interp)?;
            match args.pos.first().and_then(Value::as_index) {
                Some(ms) => {
                    let ms = u64::try_from(ms).unwrap_or(0);
                    task.get_timeout(Duration::from_millis(ms)).map_err(RunError::from)
                }
                None => task.get().map_err(RunError::from),
            }
        }
        "join" => {
            invoke::host_boundary(interp)?;
            task.join().map_err(RunError::from)?;
            Ok(Value::Unit)
        }
        "cancel" => {
            task.cancel();
            Ok(Value::Unit)
        }
        "isActive" => Ok(Value::Bool(task.is_active())),
        "isCompleted" => Ok(Value::Bool(task.is_completed())),
        "isCancelled" => Ok(Value::Bool(task.is_cancelled())),
        _ => Err(RunError::raise(
            ErrorKind::UndefinedProperty,
            format!(
                "'{}' has no method '{name}'",
                if is_job { "Job" } else { "Future" }
            ),
        )),
    }
}
