//! Bounded job queue with competing consumers.
//!
//! The queue is a tokio mpsc channel whose single receiver is shared by all
//! workers behind an async mutex, so every job is delivered to exactly one
//! worker. The sender applies backpressure when the buffer is full.
//!
//! Both halves share a set of counters. After a run they answer the one
//! question the report needs: how many jobs entered the queue and how many of
//! those were never executed.

use crate::types::Job;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicUsize,
    dequeued: AtomicUsize,
    abandoned: AtomicUsize,
}

/// Snapshot of the queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Jobs accepted by the queue
    pub enqueued: usize,
    /// Jobs handed to a worker
    pub dequeued: usize,
    /// Jobs that entered the queue but were never executed
    pub abandoned: usize,
}

/// Create a bounded job queue with the given capacity.
///
/// The capacity must be at least 1.
pub fn job_queue(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let counters = Arc::new(QueueCounters::default());

    (
        JobSender {
            tx,
            counters: counters.clone(),
        },
        JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
            counters,
        },
    )
}

/// Producer half of the job queue.
///
/// Dropping every sender declares that no more jobs will arrive.
#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::Sender<Job>,
    counters: Arc<QueueCounters>,
}

impl JobSender {
    /// Put a job on the queue, waiting while the queue is full.
    ///
    /// Returns the job back if the consumer side has been closed. Cancel
    /// safe: a cancelled call leaves the queue and its counters untouched.
    pub async fn enqueue(&self, job: Job) -> Result<(), Job> {
        match self.tx.reserve().await {
            Ok(permit) => {
                // Count before sending so a fast consumer never observes
                // dequeued > enqueued.
                self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
                permit.send(job);
                Ok(())
            }
            Err(_) => Err(job),
        }
    }
}

/// Consumer half of the job queue, shared by all workers.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    counters: Arc<QueueCounters>,
}

impl JobReceiver {
    /// Take the next job, waiting while the queue is empty.
    ///
    /// Returns `None` once every sender is gone and the buffer is drained.
    /// Cancel safe: dropping the future never loses a job.
    pub async fn dequeue(&self) -> Option<Job> {
        let mut rx = self.rx.lock().await;
        let job = rx.recv().await?;
        self.counters.dequeued.fetch_add(1, Ordering::SeqCst);
        Some(job)
    }

    /// Record jobs that were dequeued but will never be executed.
    pub fn mark_abandoned(&self, count: usize) {
        self.counters.abandoned.fetch_add(count, Ordering::SeqCst);
    }

    /// Close the queue and count every job still buffered as abandoned.
    ///
    /// Producers blocked on a full queue are released with an error. Returns
    /// the number of jobs drained.
    pub async fn close_and_drain(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();

        let mut drained = 0;
        while rx.recv().await.is_some() {
            drained += 1;
        }

        self.counters.abandoned.fetch_add(drained, Ordering::SeqCst);
        drained
    }

    /// Current counter values.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::SeqCst),
            dequeued: self.counters.dequeued.load(Ordering::SeqCst),
            abandoned: self.counters.abandoned.load(Ordering::SeqCst),
        }
    }
}

/// A job source built from a list of targets.
///
/// Jobs are numbered from 1 in production order. The source is lazy, so a
/// cycling source can feed a duration-bound run without allocating.
#[derive(Debug, Clone)]
pub struct JobSource {
    targets: Vec<String>,
    next_id: u64,
    limit: Option<u64>,
}

impl JobSource {
    /// Each target exactly once, in order.
    pub fn once(targets: Vec<String>) -> Self {
        let limit = Some(targets.len() as u64);
        Self {
            targets,
            next_id: 0,
            limit,
        }
    }

    /// `count` jobs, cycling through the targets.
    pub fn repeat(targets: Vec<String>, count: usize) -> Self {
        Self {
            targets,
            next_id: 0,
            limit: Some(count as u64),
        }
    }

    /// Cycle through the targets forever.
    pub fn cycle(targets: Vec<String>) -> Self {
        Self {
            targets,
            next_id: 0,
            limit: None,
        }
    }
}

impl Iterator for JobSource {
    type Item = Job;

    fn next(&mut self) -> Option<Job> {
        if self.targets.is_empty() {
            return None;
        }
        if let Some(limit) = self.limit {
            if self.next_id >= limit {
                return None;
            }
        }

        let index = (self.next_id % self.targets.len() as u64) as usize;
        self.next_id += 1;
        Some(Job::new(self.next_id, self.targets[index].clone()))
    }
}
