//! The scheduler worker: a min-heap of tasks keyed by predicted real time,
//! re-keyed whenever a clock anywhere in a task's ancestry changes.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use lockstep_clocks::{Clock, ClockObserver};
use tracing::{debug, error};

use crate::event::TaskEvent;

/// Upper bound on a single wait so a badly scaled `calc_when` cannot park
/// the worker forever.
const MAX_WAIT_SECS: f64 = 3600.0;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct NewTask {
    clock: Arc<Clock>,
    ticks: f64,
    callback: Callback,
}

struct Shared {
    add_queue: SegQueue<NewTask>,
    reschedule_queue: SegQueue<Arc<Clock>>,
    wake_flag: Mutex<bool>,
    wake_cond: Condvar,
    running: AtomicBool,
}

impl Shared {
    fn wake(&self) {
        *self.wake_flag.lock().unwrap() = true;
        self.wake_cond.notify_all();
    }

    /// Wait until woken or until the timeout elapses, consuming the wake
    /// flag. `None` waits indefinitely.
    fn wait_for_wake(&self, timeout: Option<Duration>) {
        let mut flag = self.wake_flag.lock().unwrap();
        if !*flag {
            match timeout {
                Some(duration) => {
                    let (guard, _) = self.wake_cond.wait_timeout(flag, duration).unwrap();
                    flag = guard;
                }
                None => {
                    while !*flag && self.running.load(AtomicOrdering::SeqCst) {
                        flag = self.wake_cond.wait(flag).unwrap();
                    }
                }
            }
        }
        *flag = false;
    }
}

impl ClockObserver for Shared {
    fn clock_changed(&self, cause: &Arc<Clock>) {
        self.reschedule_queue.push(cause.clone());
        self.wake();
    }
}

/// Heap entries are ordered by predicted fire time, then by generation
/// (oldest first), then by insertion order.
#[derive(Clone)]
struct HeapEntry {
    when: f64,
    generation: u64,
    seq: u64,
    clock_key: usize,
    task_id: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.when
            .total_cmp(&other.when)
            .then(self.generation.cmp(&other.generation))
            .then(self.seq.cmp(&other.seq))
    }
}

struct TaskRecord {
    ticks: f64,
    callback: Option<Callback>,
    /// Bumped on every reschedule; heap entries carrying an older
    /// generation are deprecated and discarded when popped.
    generation: u64,
}

struct ClockTasks {
    clock: Arc<Clock>,
    tasks: HashMap<u64, TaskRecord>,
}

/// A clock-driven task scheduler with a single worker thread.
///
/// Use the process-wide instance via [`crate::scheduler`] (the module-level
/// functions do), or create a private one for tests.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            add_queue: SegQueue::new(),
            reschedule_queue: SegQueue::new(),
            wake_flag: Mutex::new(false),
            wake_cond: Condvar::new(),
            running: AtomicBool::new(true),
        });
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("lockstep-scheduler".into())
            .spawn(move || run_worker(&worker_shared))
            .expect("failed to spawn scheduler thread");
        Self {
            shared,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a callback to run when `clock` reaches (or passes) `ticks`.
    pub fn run_at<F>(&self, clock: &Arc<Clock>, ticks: f64, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.add_queue.push(NewTask {
            clock: clock.clone(),
            ticks,
            callback: Box::new(callback),
        });
        self.shared.wake();
    }

    /// Set `event` when `clock` reaches (or passes) `ticks`.
    pub fn schedule_event(&self, clock: &Arc<Clock>, ticks: f64, event: &Arc<TaskEvent>) {
        let event = event.clone();
        self.run_at(clock, ticks, move || event.set());
    }

    /// Stop the worker thread and wait for it to finish. Pending tasks are
    /// dropped without running.
    pub fn stop(&self) {
        self.shared.running.store(false, AtomicOrdering::SeqCst);
        self.shared.wake();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: &Arc<Shared>) {
    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
    let mut registry: HashMap<usize, ClockTasks> = HashMap::new();
    let mut next_task_id: u64 = 0;
    let mut next_seq: u64 = 0;

    while shared.running.load(AtomicOrdering::SeqCst) {
        // 1. Newly scheduled tasks.
        while let Some(new_task) = shared.add_queue.pop() {
            let clock_key = Arc::as_ptr(&new_task.clock) as usize;
            let clock_tasks = registry.entry(clock_key).or_insert_with(|| {
                // Bind once per clock; unbound again when its last task runs.
                new_task.clock.bind(shared);
                ClockTasks {
                    clock: new_task.clock.clone(),
                    tasks: HashMap::new(),
                }
            });
            let task_id = next_task_id;
            next_task_id += 1;
            let when = clock_tasks.clock.calc_when(new_task.ticks);
            clock_tasks.tasks.insert(
                task_id,
                TaskRecord {
                    ticks: new_task.ticks,
                    callback: Some(new_task.callback),
                    generation: 0,
                },
            );
            // A NaN prediction (zero-speed clock) parks the task until a
            // reschedule makes it computable.
            if !when.is_nan() {
                next_seq += 1;
                heap.push(Reverse(HeapEntry {
                    when,
                    generation: 0,
                    seq: next_seq,
                    clock_key,
                    task_id,
                }));
            }
        }

        // 2. Reschedule tasks on clocks affected by a clock change.
        let mut causes: Vec<Arc<Clock>> = Vec::new();
        while let Some(cause) = shared.reschedule_queue.pop() {
            causes.push(cause);
        }
        if !causes.is_empty() {
            for (clock_key, clock_tasks) in &mut registry {
                let affected = causes.iter().any(|cause| {
                    clock_tasks
                        .clock
                        .ancestry()
                        .iter()
                        .any(|ancestor| Arc::ptr_eq(ancestor, cause))
                });
                if !affected {
                    continue;
                }
                debug!(tasks = clock_tasks.tasks.len(), "rescheduling tasks");
                for (task_id, record) in &mut clock_tasks.tasks {
                    record.generation += 1;
                    let when = clock_tasks.clock.calc_when(record.ticks);
                    if !when.is_nan() {
                        next_seq += 1;
                        heap.push(Reverse(HeapEntry {
                            when,
                            generation: record.generation,
                            seq: next_seq,
                            clock_key: *clock_key,
                            task_id: *task_id,
                        }));
                    }
                }
            }
        }

        // 3. Run everything that is due; discard deprecated entries.
        loop {
            let head = match heap.peek() {
                Some(Reverse(entry)) => entry.clone(),
                None => break,
            };
            let current = registry
                .get(&head.clock_key)
                .and_then(|ct| ct.tasks.get(&head.task_id))
                .map_or(false, |record| record.generation == head.generation);
            if !current {
                heap.pop();
                continue;
            }
            let clock = registry[&head.clock_key].clock.clone();
            if head.when > clock.source_time() {
                break;
            }
            heap.pop();
            let record = registry
                .get_mut(&head.clock_key)
                .and_then(|ct| ct.tasks.remove(&head.task_id));
            if let Some(record) = record {
                if let Some(callback) = record.callback {
                    if let Err(payload) =
                        panic::catch_unwind(AssertUnwindSafe(callback))
                    {
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(ToString::to_string)
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "non-string panic payload".into());
                        error!(%message, "scheduled task panicked");
                    }
                }
            }
            let emptied = registry
                .get(&head.clock_key)
                .map_or(false, |ct| ct.tasks.is_empty());
            if emptied {
                if let Some(clock_tasks) = registry.remove(&head.clock_key) {
                    clock_tasks.clock.unbind(shared);
                }
            }
        }

        // 4. Sleep until the next task is predicted to be due, or until new
        //    work or a clock change wakes us.
        let timeout = heap.peek().map(|head| {
            let entry = &head.0;
            let clock = &registry[&entry.clock_key].clock;
            let wait_secs = (entry.when - clock.source_time()).clamp(0.0, MAX_WAIT_SECS);
            Duration::from_secs_f64(wait_secs)
        });
        shared.wait_for_wake(timeout);
    }
}
