//! ConfigMap-driven reconciler
//!
//! One task consumes ConfigMap lifecycle events in delivery order and handles
//! each to completion before looking at the next:
//! - Added/Modified with the trigger annotation: render the template and
//!   upsert every decoded document
//! - Deleted: scale the workload down, wait for its pods to go away, then
//!   delete the workload, its Service and its PVC

mod provision;
mod reconciler;
mod teardown;

pub use provision::{AppliedResource, ProvisionReport, UpsertAction};
pub use reconciler::{EventOutcome, LoopExit, Reconciler};
pub use teardown::{DeletionResult, DrainOutcome, TeardownReport, POD_NAME_LABEL};
