//! Master server wire protocol and transport.

pub mod client;
pub mod protocol;

pub use client::MasterClient;
pub use protocol::{JobDescriptor, JobId, JobStatus, ResponseEnvelope, ServerStatus};
