//! Shared data model and wire types for `CollabTodo`.
//!
//! Everything here is plain data plus the pure mutation policy check, so
//! both the client and the edge service agree on row shapes and decisions.

pub mod audit;
pub mod change;
pub mod edge;
pub mod policy;
pub mod task;
