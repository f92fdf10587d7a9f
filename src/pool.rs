//! A bounded FIFO worker pool.
//!
//! Tasks are plain closures with owned arguments. The queue is bounded, so
//! submission blocks once `queue_capacity` tasks are pending (backpressure
//! towards the producer). Shutdown is collective: [`ThreadPool::join`]
//! closes the queue, drains it and waits for every worker. Workers are not
//! individually cancellable.

use crate::error::{Error, Result};
use crossbeam::channel::{bounded, Sender};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `num_workers` workers behind a queue of `queue_capacity`
    /// pending tasks. With zero workers, tasks run inline on the caller.
    pub fn new(num_workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = bounded::<Job>(queue_capacity.max(1));

        let mut workers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let receiver = receiver.clone();
            workers.push(std::thread::spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            }));
        }

        Self { sender: Some(sender), workers }
    }

    /// Submits a task. Blocks while the queue is full. Fails with
    /// [`Error::Shutdown`] after [`ThreadPool::join`].
    pub fn enqueue<F: FnOnce() + Send + 'static>(&self, job: F) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(Error::Shutdown)?;
        if self.workers.is_empty() {
            // Inline mode: no workers were requested.
            job();
            return Ok(());
        }
        sender.send(Box::new(job)).map_err(|_| Error::Shutdown)
    }

    /// Closes the queue and waits for all workers to drain it.
    pub fn join(&mut self) {
        self.sender = None; // closes the channel
        for worker in self.workers.drain(..) {
            worker.join().expect("worker thread panicked");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.join();
    }
}
