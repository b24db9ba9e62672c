//! Offline replay of vector synchronization scenarios.

pub mod replay;
pub mod scenario;

pub use replay::{Summary, run};
pub use scenario::Scenario;
