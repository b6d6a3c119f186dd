pub mod copy;
pub mod crawler;
pub mod dedupe;
pub mod executor;
pub mod limiter;
pub mod node;
mod progress;
pub mod summary;
pub mod task;
#[cfg(test)]
mod testing;
pub mod timeout;
pub mod tree_cache;
