//! Lease/worker harness: simulated resources, the worker loop, and the
//! supervisor that runs workers against a pool.

pub mod operation;
pub mod supervisor;
pub mod worker;

pub use operation::{OperationOutcome, SimulatedOperation};
pub use supervisor::{HarnessReport, Supervisor, EVENT_BUFFER};
pub use worker::{run_worker, LeaseSlot, WorkerContext, WorkerEvent, WorkerEventKind, WorkerSummary};
