use std::thread;
use tracing::error;

use super::ThreadPool;
use crate::Result;

/// Not actually a pool: every job gets a thread of its own, so it never runs out of workers.
pub struct NaiveThreadPool;

impl ThreadPool for NaiveThreadPool {
    fn new(_threads: u32) -> Result<Self> {
        Ok(NaiveThreadPool)
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = thread::Builder::new().name("pmix-conn".into()).spawn(job) {
            error!("failed to spawn a connection thread: {}", e);
        }
    }
}
