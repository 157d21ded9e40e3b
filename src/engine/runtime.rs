//! Background check workers.
//!
//! A small, bounded, thread-based pool. Jobs carry only a rule id; the worker
//! claims the rule from the shared table, so a job for a rule that is already
//! settled or being checked elsewhere is a no-op.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
#[cfg(test)]
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

use crate::error::EngineError;

use super::Shared;

pub(crate) enum Job {
    Check {
        rule: String,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

pub(crate) struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    pub(crate) fn start(workers: usize, queue_capacity: usize, shared: &Arc<Shared>) -> Self {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let shared = Arc::clone(shared);
            let handle = thread::Builder::new()
                .name(format!("dmcheck-worker-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Check { rule }) => {
                            if let Err(err) = shared.check_pending_rule(&rule) {
                                warn!(rule = %rule, error = %err, "background check failed");
                            }
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .expect("failed to spawn dmcheck worker");
            handles.push(handle);
        }

        Self {
            tx,
            workers: handles,
            queue_capacity,
        }
    }

    pub(crate) fn try_submit(&self, job: Job) -> Result<(), EngineError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EngineError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(EngineError::Disconnected {
                path: "check_queue".to_string(),
            }),
        }
    }

    pub(crate) fn shutdown(self) {
        // Close the channel: workers drain queued jobs then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}
