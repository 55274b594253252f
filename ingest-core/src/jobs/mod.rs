//! Job lifecycle: the durable store (C3) and the worker pool that drains
//! it (C4).

mod clock;
pub mod store;
pub mod worker;

pub use crate::models::Job;
pub use store::{FailOutcome, InMemoryJobStore, JobFilter, JobStore, Pagination, SubmitJob};
pub use worker::{cancel_job, ActiveJobRegistry, WorkerPool};
