//! Queue worker and its settlement policy

pub mod queue_worker;
pub mod settlement;

pub use queue_worker::QueueWorker;
pub use settlement::{
    effective_criticality, retry_or_dead_letter, settlement_after_callback, Settlement,
};
