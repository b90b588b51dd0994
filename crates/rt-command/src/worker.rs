//! Worker thread for asynchronous observers and event handlers.

use std::sync::mpsc::{Sender, channel};
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::error::CommandError;

/// A unit of deferred work. An `Err` is reported to the handle.
pub(crate) type Job = Box<dyn FnOnce() -> Result<(), CommandError> + Send>;

/// One handle-owned thread draining a job queue.
pub(crate) struct Worker {
    jobs: Sender<Job>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Spawn the thread. Job failures go to `errors`.
    pub(crate) fn spawn(name: String, errors: Sender<CommandError>) -> std::io::Result<Self> {
        let (jobs, rx) = channel::<Job>();
        let thread = thread::Builder::new().name(name).spawn(move || {
            for job in rx {
                if let Err(e) = job() {
                    warn!(error = %e, "asynchronous handler failed");
                    let _ = errors.send(e);
                }
            }
        })?;
        Ok(Self { jobs, thread })
    }

    /// Queue a job. Returns it back if the thread is gone.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        self.jobs.send(job).map_err(|e| e.0)
    }

    /// Close the queue and wait for queued jobs to finish.
    ///
    /// Returns `false` if the thread panicked.
    pub(crate) fn join(self) -> bool {
        drop(self.jobs);
        self.thread.join().is_ok()
    }
}
