//! `CollabTodo` edge validator library.
//!
//! Exposes the `validate-task` endpoint for use in tests and embedding.
//! The endpoint re-checks that a caller owns a task and that the requested
//! action is allowed by the mutation-age policy, writing an audit row for
//! every decision it makes about a known caller.

pub mod config;
pub mod server;
pub mod store;
pub mod validator;
