//! Keeps a scene's drawables in step with a vector layer and its source.
//!
//! [`VectorContext`] is the registry of drawables created for one layer,
//! [`update`] mutates drawables that already exist, [`Converter`] turns
//! features into drawables and [`VectorSynchronizer`] routes model events to
//! all of them.

pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod metadata;
pub mod synchronizer;
pub mod update;

#[cfg(test)]
mod scenarios;

pub use config::*;
pub use context::*;
pub use convert::*;
pub use error::*;
pub use metadata::*;
pub use synchronizer::*;
pub use update::{
    AttributeSet, UpdateOutcome, run_due_updates, should_update_primitive, update_primitive,
};
