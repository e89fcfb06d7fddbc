//! Shared types for the question dispatcher workspace.
//!
//! Everything that crosses a crate boundary lives here: tiers, tasks, call
//! outcomes, cache entries, the error taxonomy, the clock abstraction and the
//! collaborator traits the dispatcher is written against.

pub mod clock;
pub mod collab;
pub mod error;
pub mod task;
pub mod types;
