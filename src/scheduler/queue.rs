//! Task Queue Set
//!
//! One bounded queue per resource plus one global priority queue, all built
//! on bounded tokio channels. Every operation is non-blocking: pushes hand
//! the task back on failure and pops report `Empty` rather than waiting.

use super::task::DownloadTask;
use crate::output::QueueDepth;
use crate::resource::ResourceRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Where an accepted task was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The resource queue with this index
    Resource(usize),
    /// The global priority queue
    Priority,
}

/// Result of a non-blocking dequeue
#[derive(Debug)]
pub enum Dequeue {
    Task(DownloadTask),
    /// Nothing available right now; idle and poll again
    Empty,
    /// Queues are closed and fully drained; the worker should exit
    Closed,
}

struct BoundedQueue {
    name: String,
    tx: mpsc::Sender<DownloadTask>,
    rx: Mutex<mpsc::Receiver<DownloadTask>>,
}

impl BoundedQueue {
    fn new(name: String, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn receiver(&self) -> MutexGuard<'_, mpsc::Receiver<DownloadTask>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_push(&self, task: DownloadTask) -> Result<(), DownloadTask> {
        self.tx.try_send(task).map_err(|e| e.into_inner())
    }

    fn try_pop(&self) -> Result<DownloadTask, TryRecvError> {
        self.receiver().try_recv()
    }

    fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Rejects further pushes; buffered tasks remain poppable
    fn close(&self) {
        self.receiver().close();
    }

    fn depth(&self) -> QueueDepth {
        QueueDepth {
            name: self.name.clone(),
            len: self.len(),
            capacity: self.capacity(),
        }
    }
}

/// Per-resource queues plus the shared priority queue
pub struct QueueSet {
    resources: Vec<BoundedQueue>,
    priority: BoundedQueue,
    closed: AtomicBool,
}

impl QueueSet {
    /// Builds queues from `(name, capacity)` pairs in resource index order
    pub fn new<I>(resources: I, priority_capacity: usize) -> Self
    where
        I: IntoIterator<Item = (String, usize)>,
    {
        Self {
            resources: resources
                .into_iter()
                .map(|(name, capacity)| BoundedQueue::new(name, capacity))
                .collect(),
            priority: BoundedQueue::new("priority".to_string(), priority_capacity),
            closed: AtomicBool::new(false),
        }
    }

    /// Sizes one queue per registered resource from its capacity class
    pub fn from_registry(registry: &ResourceRegistry, priority_capacity: usize) -> Self {
        Self::new(
            registry
                .iter()
                .map(|r| (r.name.clone(), r.queue_capacity)),
            priority_capacity,
        )
    }

    /// Direct insert into the task's resource queue, then the priority queue
    ///
    /// # Returns
    ///
    /// * `Ok(Placement)` - Where the task landed
    /// * `Err(task)` - Both queues were full or closed; the caller owns the
    ///   task again and must apply the overflow policy
    pub fn try_enqueue(&self, task: DownloadTask) -> Result<Placement, DownloadTask> {
        let index = task.resource;
        let task = match self.resources.get(index) {
            Some(queue) => match queue.try_push(task) {
                Ok(()) => return Ok(Placement::Resource(index)),
                Err(task) => task,
            },
            None => task,
        };

        self.priority.try_push(task).map(|()| Placement::Priority)
    }

    /// Insert into the priority queue only
    pub fn try_push_priority(&self, task: DownloadTask) -> Result<(), DownloadTask> {
        self.priority.try_push(task)
    }

    /// Insert into the priority queue, else any resource queue with room
    ///
    /// Resource queues are tried starting from the task's own resource.
    pub fn try_push_any(&self, task: DownloadTask) -> Result<Placement, DownloadTask> {
        let mut task = match self.priority.try_push(task) {
            Ok(()) => return Ok(Placement::Priority),
            Err(task) => task,
        };

        let count = self.resources.len();
        for offset in 0..count {
            let index = (task.resource + offset) % count;
            match self.resources[index].try_push(task) {
                Ok(()) => return Ok(Placement::Resource(index)),
                Err(returned) => task = returned,
            }
        }

        Err(task)
    }

    /// Takes the next task for a worker of `resource`
    ///
    /// The priority queue is always checked first, so a worker never takes
    /// a resource task while a priority task is waiting.
    pub fn dequeue(&self, resource: usize) -> Dequeue {
        // Loaded before polling: once set, no push can succeed, so two empty
        // polls afterwards mean the queues are drained for good
        let closed = self.closed.load(Ordering::Acquire);

        if let Ok(task) = self.priority.try_pop() {
            return Dequeue::Task(task);
        }

        if let Some(queue) = self.resources.get(resource) {
            if let Ok(task) = queue.try_pop() {
                return Dequeue::Task(task);
            }
        }

        if closed {
            Dequeue::Closed
        } else {
            Dequeue::Empty
        }
    }

    /// Closes every queue
    ///
    /// Pushes fail from here on; workers keep draining what is buffered and
    /// then see [`Dequeue::Closed`].
    pub fn close(&self) {
        self.priority.close();
        for queue in &self.resources {
            queue.close();
        }
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total queued tasks over total capacity, priority queue included
    pub fn utilization(&self) -> f64 {
        let (len, capacity) = self
            .resources
            .iter()
            .chain(std::iter::once(&self.priority))
            .fold((0usize, 0usize), |(len, cap), q| (len + q.len(), cap + q.capacity()));

        if capacity == 0 {
            0.0
        } else {
            len as f64 / capacity as f64
        }
    }

    pub fn priority_depth(&self) -> QueueDepth {
        self.priority.depth()
    }

    /// Fill levels of the resource queues in index order
    pub fn resource_depths(&self) -> Vec<QueueDepth> {
        self.resources.iter().map(BoundedQueue::depth).collect()
    }
}
