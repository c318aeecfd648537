//! Ordered delivery of user callbacks
//!
//! Calibration callbacks are never run while session state is locked. The
//! session enqueues each delivery inside its critical section, so the order
//! of deliveries matches the order of decisions, and a dedicated thread runs
//! them one by one.

use crossbeam_channel::{bounded, unbounded, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Flush(Sender<()>),
}

/// Single-threaded FIFO executor for user callbacks
pub struct CallbackQueue {
    tx: Option<Sender<Message>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl Default for CallbackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackQueue {
    /// Spawn the callback thread
    pub fn new() -> Self {
        let (tx, rx) = unbounded::<Message>();
        let worker = thread::Builder::new()
            .name("radiocal-callbacks".to_string())
            .spawn(move || {
                for message in rx {
                    match message {
                        Message::Run(job) => {
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                tracing::error!("Calibration callback panicked");
                            }
                        }
                        Message::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })
            .ok();

        let worker_id = worker
            .as_ref()
            .map(|handle| handle.thread().id())
            .unwrap_or_else(|| thread::current().id());

        if worker.is_none() {
            tracing::error!("Failed to spawn callback thread, callbacks will be dropped");
        }

        Self {
            tx: worker.as_ref().map(|_| tx),
            worker,
            worker_id,
        }
    }

    /// Enqueue a callback; never runs it on the calling thread
    pub fn push<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(tx) = &self.tx {
            if tx.send(Message::Run(Box::new(job))).is_err() {
                tracing::warn!("Callback thread is gone, dropping callback");
            }
        }
    }

    /// Block until every callback enqueued so far has run
    ///
    /// Returns immediately when called from a callback.
    pub fn flush(&self) {
        if thread::current().id() == self.worker_id {
            return;
        }
        let Some(tx) = &self.tx else {
            return;
        };
        let (done_tx, done_rx) = bounded(1);
        if tx.send(Message::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for CallbackQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}
