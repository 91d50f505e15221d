//! Out-of-process delivery for cascade notifications.
//!
//! A [`RemoteBackend`] plugged into the engine's `DispatchQueue` ships each
//! page of observers to a [`WorkerServer`], which runs it against its own
//! engine. Failures of remotely delivered pages stay on the worker.

pub mod backend;
pub mod remote;
pub mod telemetry;
pub mod worker;

pub use backend::{backend_from_config, dispatch_queue};
pub use remote::RemoteBackend;
pub use telemetry::init_tracing;
pub use worker::{WorkProcessor, WorkerServer, WorkerStats};
