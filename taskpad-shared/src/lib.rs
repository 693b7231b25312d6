//! # Taskpad Shared Library
//!
//! Client-side core of Taskpad, a personal to-do list backed by a hosted
//! auth + data service. Front-ends (the `taskpad` CLI, tests) talk to the
//! [`session::SessionManager`] to sign users in and out and to the
//! [`repository::TaskRepository`] for task CRUD; both reach the service only
//! through the [`backend`] traits.
//!
//! ## Module Organization
//!
//! - `backend`: Backend traits, REST client and in-memory implementation
//! - `config`: Backend connection configuration
//! - `error`: Session and repository error types
//! - `models`: Tasks, users and session snapshots
//! - `repository`: Task CRUD scoped to the signed-in user
//! - `session`: Session state machine and change listeners

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod session;

/// Current version of the Taskpad shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
