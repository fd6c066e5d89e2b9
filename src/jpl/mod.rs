//! Job Persistence Layer: a crash-recoverable record of each bulk
//! filesystem job, backed by SQLite.

pub mod database;
pub mod job;

pub use database::{Jpl, JplError};
pub use job::{ConflictPolicy, Job, JobStatus, Operation, WorkItem, WorkItemStatus};
