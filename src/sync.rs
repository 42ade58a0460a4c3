//! Joining spawned workers
//!
//! Every spawned worker is joined, even after one of them has failed, so no
//! thread outlives the call. The first failure (in worker order) is what the
//! caller sees.

use crate::error::ForError;
use std::any::Any;
use std::thread::ScopedJoinHandle;
use tracing::trace;

/// A spawned worker, tagged with the index of the chunk it runs
pub struct WorkerHandle<'scope> {
    pub worker: usize,
    handle: ScopedJoinHandle<'scope, ()>,
}

impl<'scope> WorkerHandle<'scope> {
    pub fn new(worker: usize, handle: ScopedJoinHandle<'scope, ()>) -> Self {
        Self { worker, handle }
    }

    /// Block until the worker finishes
    pub fn join(self) -> Result<(), ForError> {
        let worker = self.worker;
        self.handle
            .join()
            .map_err(|payload| ForError::WorkerPanicked {
                worker,
                message: panic_message(payload.as_ref()),
            })
    }
}

/// Block until every worker has finished
pub fn join_all(workers: Vec<WorkerHandle<'_>>) -> Result<(), ForError> {
    let mut first_error = None;
    for worker in workers {
        let id = worker.worker;
        match worker.join() {
            Ok(()) => trace!(worker = id, "worker joined"),
            Err(err) => {
                trace!(worker = id, error = %err, "worker failed");
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Extract a readable message from a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
