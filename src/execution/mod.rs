pub mod attempt;
pub mod batch;
pub mod orchestrator;

pub use attempt::{
    AttemptOutcome, ExecutionAttempt, SubAttempt, SubAttemptOutcome, TransportFailureRecord,
};
pub use batch::{batch_trigger, BatchItem, BatchOptions};
pub use orchestrator::{ExecutionError, ExecutionOptions, ExecutionOrchestrator};
