//! The dispatch pipeline: the one place every operation flows through.
//!
//! An adapter builds a [`cleo_core::DispatchRequest`]; the pipeline runs
//! ordered middleware (tier projection, alias resolution, parameter
//! validation, verification gate, audit), routes to the domain handler,
//! and returns the uniform envelope. Middleware may short-circuit by
//! producing a response, in which case nothing downstream runs.

pub mod alias;
pub mod handlers;
pub mod jobs;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod tier;

#[cfg(test)]
mod pipeline_tests;

pub use jobs::{JobManager, JobStatus};
pub use pipeline::Dispatcher;
pub use retry::{dispatch_with_retries, RetryPolicy};
pub use tier::MviTier;
