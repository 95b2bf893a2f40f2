//! Synchronous validation in front of the store.
//!
//! Three pieces live here:
//!
//! - the [`gate::VerificationGate`]: four layers (schema, semantic,
//!   referential, protocol) run in fixed order over an operation context;
//!   the first failed layer blocks the operation,
//! - the [`workflow::WorkflowGateTracker`]: the six-gate quality chain
//!   attached to every task, with its failure cascade,
//! - the [`protocol::ProtocolEnforcer`]: manifest, research-output, and
//!   provenance contracts.

pub mod context;
pub mod gate;
pub mod protocol;
pub mod report;
pub mod workflow;

mod referential;
mod schema;
mod semantic;

pub use context::{OperationContext, ProtocolType, SnapshotView};
pub use gate::VerificationGate;
pub use report::{GateReport, LayerName, LayerResult, LayerStatus, Violation};
pub use workflow::WorkflowGateTracker;
