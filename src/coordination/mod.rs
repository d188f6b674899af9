//! Request-level coordination: sharing identical in-flight requests and
//! retiring superseded background checks.

pub mod checks;
pub mod single_flight;

pub use checks::{CheckCoordinator, CheckEpoch, CheckOutcome};
pub use single_flight::{request_key, SingleFlight};
