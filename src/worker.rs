//! Background execution of retriable tasks on a single worker thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// A task is re-run on every sweep until it reports completion by returning
/// `true`.
pub type Task = Box<dyn FnMut() -> bool + Send>;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct TaskList {
    tasks: Vec<Task>,
    /// `true` while a worker thread is alive and sweeping.
    running: bool,
}

struct Shared {
    list: Mutex<TaskList>,
    wakeup: Condvar,
    stop: AtomicBool,
}

/// Runs independent, self-terminating retry tasks on one background thread.
///
/// The thread is spawned lazily by the first [`push_task`](Self::push_task)
/// and exits on its own once every task has completed; a later push spawns a
/// fresh one. Between sweeps the worker sleeps for one second. There is no
/// priority or scheduling beyond list order.
pub struct WorkerThreadService {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for WorkerThreadService {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerThreadService {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                list: Mutex::new(TaskList {
                    tasks: Vec::new(),
                    running: false,
                }),
                wakeup: Condvar::new(),
                stop: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Appends `task` to the sweep list, spawning the worker thread if none
    /// is alive.
    pub fn push_task(&self, task: Task) {
        let mut list = self.shared.list.lock();
        list.tasks.push(task);
        if list.running {
            debug!("task added to the running worker thread");
            return;
        }
        list.running = true;
        drop(list);

        debug!("initial task added, spawning worker thread");
        let mut handle = self.handle.lock();
        // A previous worker that already drained its list may still be in
        // its final instructions; reap it before spawning the next one.
        if let Some(previous) = handle.take() {
            let _ = previous.join();
        }
        self.shared.stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        *handle = Some(std::thread::spawn(move || Self::sweep_loop(&shared)));
    }

    /// Stops the worker thread and joins it. Pending tasks are dropped.
    pub fn stop(&self) {
        debug!("stopping worker thread");
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
            debug!("worker thread stopped");
        }
    }

    fn sweep_loop(shared: &Shared) {
        let mut guard = shared.list.lock();
        loop {
            if shared.stop.load(Ordering::SeqCst) {
                guard.tasks.clear();
                guard.running = false;
                return;
            }

            // Execute with the list mutex released so tasks may push further
            // tasks and take their own locks.
            let mut tasks = core::mem::take(&mut guard.tasks);
            drop(guard);
            tasks.retain_mut(|task| !task());
            guard = shared.list.lock();
            let pushed_meanwhile = core::mem::take(&mut guard.tasks);
            guard.tasks = tasks;
            guard.tasks.extend(pushed_meanwhile);

            if guard.tasks.is_empty() {
                debug!("worker thread ends, task list is empty");
                guard.running = false;
                return;
            }
            shared
                .wakeup
                .wait_for(&mut guard, SWEEP_INTERVAL);
        }
    }
}

impl Drop for WorkerThreadService {
    fn drop(&mut self) {
        self.stop();
    }
}
