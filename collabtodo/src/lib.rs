//! `CollabTodo`: collaborative to-do list with optimistic realtime sync.

pub mod app;
pub mod audit;
pub mod config;
pub mod error;
pub mod remote;
pub mod session;
pub mod tasks;
