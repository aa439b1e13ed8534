//! Start/stop lifecycle shared by the long-running components.
//!
//! The runner holds a `Vec<Box<dyn Service>>`, starts them in order and stops
//! them in reverse on shutdown.

pub trait Service: Send {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Spawn the worker threads. Calling it on a running service is a no-op.
    fn start(&mut self) -> anyhow::Result<()>;

    /// Cancel and join the worker threads. Safe to call repeatedly, and on a
    /// service that never started.
    fn stop(&mut self) -> anyhow::Result<()>;
}
