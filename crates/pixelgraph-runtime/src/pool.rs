//! The hand-rolled worker pool: a fixed set of OS threads pulling boxed
//! tasks off a shared channel. This is the one place in the workspace that
//! owns a long-lived thread pool — [`pixelgraph_compute::parallel`] only
//! plans tasks against the [`TaskExecutor`] trait, it never spawns threads
//! itself.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use pixelgraph_compute::TaskExecutor;
use tracing::debug;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// `num_workers` threads, each looping on the shared receiver until the
/// pool (and every [`TaskExecutor`] handle to it) is dropped and the
/// channel closes.
pub struct WorkerPool {
    // `None` only between the start of `drop` and the pool's destruction —
    // dropping the sender first is what makes the workers' `recv()` return
    // `Err` and exit their loops, so `join` below doesn't hang forever.
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Self {
        let (sender, receiver) = channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..num_workers.max(1))
            .map(|_| {
                let receiver: Arc<Mutex<Receiver<Task>>> = Arc::clone(&receiver);
                thread::spawn(move || loop {
                    let task = receiver.lock().unwrap().recv();
                    match task {
                        Ok(task) => task(),
                        Err(_) => break,
                    }
                })
            })
            .collect();
        debug!(num_workers = num_workers.max(1), "worker pool started");
        WorkerPool { sender: Some(sender), workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl TaskExecutor for WorkerPool {
    fn submit(&self, task: Task) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(task);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("worker pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_submitted_task_runs() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = channel();
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            let done_tx = done_tx.clone();
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            }));
        }
        for _ in 0..20 {
            done_rx.recv().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
