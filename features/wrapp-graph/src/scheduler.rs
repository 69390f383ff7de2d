use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use futures::{executor::block_on, StreamExt};
use futures_channel::mpsc;

use crate::{
    deferred::{BuildResult, Deferred},
    errors::DiError,
};

/// Work handed to a scheduler - usually the body of a constructor
pub type Work = Box<dyn FnOnce() -> Result<(), DiError> + Send>;

/// Decides when and where scheduled work runs
///
/// Deferreds returned by [Scheduler::schedule] are always resolved on the thread calling
/// [Scheduler::flush].
pub trait Scheduler {
    fn schedule(&self, work: Work) -> Deferred;

    /// Runs all queued work, including work scheduled while flushing
    fn flush(&self) -> Result<(), DiError>;
}

/// Scheduler selection for a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerKind {
    /// Run constructors right away on the calling thread
    #[default]
    Synchronous,
    /// Run constructors on a pool of `n` worker threads during flush
    Parallel(usize),
    /// Run every constructor on its own thread during flush
    Unbounded,
}

impl SchedulerKind {
    pub(crate) fn build(self) -> Rc<dyn Scheduler> {
        match self {
            SchedulerKind::Synchronous => Rc::new(Synchronous),
            SchedulerKind::Parallel(workers) => Rc::new(WorkerPool::bounded(
                NonZeroUsize::new(workers).unwrap_or(NonZeroUsize::MIN),
            )),
            SchedulerKind::Unbounded => Rc::new(WorkerPool::unbounded()),
        }
    }
}

/// Runs work immediately
#[derive(Debug, Default)]
pub struct Synchronous;

impl Scheduler for Synchronous {
    fn schedule(&self, work: Work) -> Deferred {
        Deferred::settled(run_guarded(work))
    }

    fn flush(&self) -> Result<(), DiError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum PoolSize {
    Bounded(NonZeroUsize),
    Unbounded,
}

/// Queues work and runs it on worker threads when flushed
pub struct WorkerPool {
    size: PoolSize,
    queue: RefCell<VecDeque<(Work, Deferred)>>,
    flushing: Cell<bool>,
}

impl WorkerPool {
    pub fn bounded(workers: NonZeroUsize) -> Self {
        Self::with_size(PoolSize::Bounded(workers))
    }

    pub fn unbounded() -> Self {
        Self::with_size(PoolSize::Unbounded)
    }

    fn with_size(size: PoolSize) -> Self {
        WorkerPool {
            size,
            queue: RefCell::new(VecDeque::new()),
            flushing: Cell::new(false),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    fn pop(&self) -> Option<(Work, Deferred)> {
        self.queue.borrow_mut().pop_front()
    }

    fn drain(&self) -> Result<(), DiError> {
        if self.queue.borrow().is_empty() {
            return Ok(());
        }

        let mut in_flight: HashMap<usize, Deferred> = HashMap::new();
        let result = self.run_queue(&mut in_flight);
        if let Err(error) = &result {
            self.abandon(in_flight, error);
        }
        result
    }

    fn run_queue(&self, in_flight: &mut HashMap<usize, Deferred>) -> Result<(), DiError> {
        let (result_tx, mut result_rx) = mpsc::unbounded::<(usize, BuildResult)>();
        // Dropping the workers closes their task channel and joins them
        let workers = match self.size {
            PoolSize::Bounded(count) => Some(Workers::spawn(count.get(), &result_tx)?),
            PoolSize::Unbounded => None,
        };

        let mut next_id = 0;
        let mut completed = 0;
        loop {
            while let Some((work, deferred)) = self.pop() {
                let id = next_id;
                next_id += 1;
                in_flight.insert(id, deferred);
                match &workers {
                    Some(workers) => workers.submit(id, work)?,
                    None => spawn_task(id, work, result_tx.clone())?,
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tracing::trace!(
                "Waiting for scheduled work [{completed} complete, {} in flight]",
                in_flight.len()
            );
            let (id, result) = block_on(result_rx.next())
                .ok_or_else(|| DiError::Internal("scheduler result channel closed".to_string()))?;
            completed += 1;

            let deferred = in_flight.remove(&id).ok_or_else(|| {
                DiError::Internal(format!("scheduler received a result for unknown task {id}"))
            })?;
            // May schedule more work, which is picked up on the next iteration
            deferred.resolve(result);
        }

        tracing::debug!("Flush finished after {completed} tasks");
        Ok(())
    }

    /// Fails every task the flush could not finish, their nodes go back to idle
    fn abandon(&self, in_flight: HashMap<usize, Deferred>, error: &DiError) {
        tracing::debug!(
            "Flush aborted with {} tasks in flight and {} queued: {error}",
            in_flight.len(),
            self.pending()
        );
        for deferred in in_flight.into_values() {
            deferred.resolve(Err(error.clone()));
        }
        // Failing a task may queue more work
        while let Some((_, deferred)) = self.pop() {
            deferred.resolve(Err(error.clone()));
        }
    }
}

impl Scheduler for WorkerPool {
    fn schedule(&self, work: Work) -> Deferred {
        let deferred = Deferred::new();
        self.queue.borrow_mut().push_back((work, deferred.clone()));
        deferred
    }

    fn flush(&self) -> Result<(), DiError> {
        // Work scheduled from within a flush is drained by the outer flush
        if self.flushing.replace(true) {
            return Ok(());
        }
        let result = self.drain();
        self.flushing.set(false);
        result
    }
}

type TaskReceiver = Arc<Mutex<mpsc::UnboundedReceiver<(usize, Work)>>>;
type ResultSender = mpsc::UnboundedSender<(usize, BuildResult)>;

/// Fixed set of worker threads living for the duration of one flush
struct Workers {
    task_tx: Option<mpsc::UnboundedSender<(usize, Work)>>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    fn spawn(count: usize, results: &ResultSender) -> Result<Self, DiError> {
        let (task_tx, task_rx) = mpsc::unbounded();
        let task_rx: TaskReceiver = Arc::new(Mutex::new(task_rx));

        let handles = (0..count)
            .map(|index| {
                let tasks = task_rx.clone();
                let results = results.clone();
                thread::Builder::new()
                    .name(format!("wrapp-graph-worker-{index}"))
                    .spawn(move || worker_loop(tasks, results))
                    .map_err(|e| DiError::Internal(format!("failed to spawn worker thread: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::trace!("Spawned {count} worker threads");
        Ok(Workers {
            task_tx: Some(task_tx),
            handles,
        })
    }

    fn submit(&self, id: usize, work: Work) -> Result<(), DiError> {
        self.task_tx
            .as_ref()
            .ok_or_else(|| DiError::Internal("worker pool already shut down".to_string()))?
            .unbounded_send((id, work))
            .map_err(|_| DiError::Internal("worker pool task channel closed".to_string()))
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.task_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(tasks: TaskReceiver, results: ResultSender) {
    loop {
        // Holding the lock while waiting is fine, whoever gets the next task runs it
        let next = match tasks.lock() {
            Ok(mut rx) => block_on(rx.next()),
            Err(_) => return,
        };
        let Some((id, work)) = next else {
            return;
        };
        if results.unbounded_send((id, run_guarded(work))).is_err() {
            return;
        }
    }
}

fn spawn_task(id: usize, work: Work, results: ResultSender) -> Result<(), DiError> {
    thread::Builder::new()
        .name(format!("wrapp-graph-task-{id}"))
        .spawn(move || {
            let _ = results.unbounded_send((id, run_guarded(work)));
        })
        .map(drop)
        .map_err(|e| DiError::Internal(format!("failed to spawn task thread: {e}")))
}

/// Runs `work`, turning a panic into an error
pub(crate) fn run_guarded(work: Work) -> Result<(), DiError> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => Err(DiError::TaskPanicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        rc::Rc,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn counting_work(counter: &Arc<AtomicUsize>) -> Work {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn synchronous_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let deferred = Synchronous.schedule(counting_work(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(deferred.result(), Some(Ok(()))));
        assert!(Synchronous.flush().is_ok());
    }

    #[test]
    fn pool_defers_until_flush() {
        for scheduler in [SchedulerKind::Parallel(3), SchedulerKind::Unbounded] {
            let scheduler = scheduler.build();
            let counter = Arc::new(AtomicUsize::new(0));
            let deferreds: Vec<_> = (0..10)
                .map(|_| scheduler.schedule(counting_work(&counter)))
                .collect();

            assert_eq!(counter.load(Ordering::SeqCst), 0);
            assert!(deferreds.iter().all(|d| !d.is_settled()));

            scheduler.flush().unwrap();
            assert_eq!(counter.load(Ordering::SeqCst), 10);
            assert!(deferreds.iter().all(|d| matches!(d.result(), Some(Ok(())))));
        }
    }

    #[test]
    fn work_scheduled_during_flush_is_folded_in() {
        let scheduler: Rc<dyn Scheduler> = SchedulerKind::Parallel(2).build();
        let counter = Arc::new(AtomicUsize::new(0));
        let second: Rc<RefCell<Option<Deferred>>> = Rc::default();

        let first = scheduler.schedule(counting_work(&counter));
        {
            let scheduler = scheduler.clone();
            let counter = counter.clone();
            let second = second.clone();
            first.observe(move |_| {
                *second.borrow_mut() = Some(scheduler.schedule(counting_work(&counter)));
            });
        }

        scheduler.flush().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let second = second.borrow().clone().unwrap();
        assert!(matches!(second.result(), Some(Ok(()))));
    }

    #[test]
    fn panics_become_errors() {
        let scheduler = SchedulerKind::Parallel(1).build();
        let deferred = scheduler.schedule(Box::new(|| panic!("constructor exploded")));
        scheduler.flush().unwrap();
        match deferred.result() {
            Some(Err(DiError::TaskPanicked(message))) => assert_eq!(message, "constructor exploded"),
            other => panic!("unexpected result: {other:?}"),
        }

        let deferred = Synchronous.schedule(Box::new(|| panic!("{}", String::from("owned"))));
        assert!(matches!(deferred.result(), Some(Err(DiError::TaskPanicked(m))) if m == "owned"));
    }

    #[test]
    fn aborted_flush_fails_unfinished_work() {
        let pool = WorkerPool::unbounded();
        let counter = Arc::new(AtomicUsize::new(0));
        let queued = pool.schedule(counting_work(&counter));
        let running = Deferred::new();
        let in_flight = HashMap::from([(0, running.clone())]);

        pool.abandon(in_flight, &DiError::Internal("channel closed".to_string()));

        assert_eq!(pool.pending(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        for deferred in [queued, running] {
            assert!(matches!(deferred.result(), Some(Err(DiError::Internal(m))) if m == "channel closed"));
        }

        // Nothing is left behind for the next flush
        pool.schedule(counting_work(&counter));
        pool.flush().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_is_reusable_after_flush() {
        let pool = WorkerPool::bounded(NonZeroUsize::new(2).unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        pool.schedule(counting_work(&counter));
        pool.flush().unwrap();
        assert_eq!(pool.pending(), 0);

        pool.schedule(counting_work(&counter));
        assert_eq!(pool.pending(), 1);
        pool.flush().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
