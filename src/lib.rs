//! Worker agent — pulls jobs from a master server, runs them through
//! registered workers, and reports status back.

pub mod cache;
pub mod config;
pub mod error;
pub mod job;
pub mod master;
pub mod server;
pub mod sync;
pub mod workers;
