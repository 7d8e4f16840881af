//! Routing key interpretation
//!
//! Turns the broker routing key into the function destination and the
//! criticality flag carried through the rest of the pipeline.

pub mod router;

pub use router::{binding_matches, destination_for, route, Route, RoutingError, CRITICAL_MARKER};
