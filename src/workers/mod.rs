//! Worker capability contract and registry.

pub mod builtin;
pub mod registry;
pub mod worker;

pub use builtin::SleepWorker;
pub use registry::WorkerRegistry;
pub use worker::Worker;
