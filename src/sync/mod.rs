//! Concurrency primitives for the coordination engine.

pub mod lock;
pub mod timer;
pub mod wait;

pub use lock::SerialLock;
pub use timer::Timer;
pub use wait::{WaitMap, WaitOutcome};
