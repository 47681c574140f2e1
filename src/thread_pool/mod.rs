//! Worker pools the server services its connections with.
//!
//! A connection occupies its worker until the client disconnects, and a worker blocked in a
//! fence waits for the other participants' workers. A pool therefore needs at least as many
//! threads as there are clients taking part in the largest fence.
use crate::Result;

/// the behaviour shared by every pool
pub trait ThreadPool {
    /// creates a pool with the given number of `threads`
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// runs `job` on one of the pool's threads
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}

mod naive;
mod rayon_pool;
mod shared_queue;

pub use self::naive::NaiveThreadPool;
pub use self::rayon_pool::RayonThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;
