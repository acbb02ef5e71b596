//! `TaskFtp` dev server library.
//!
//! A small in-memory FTP server exposing just the commands the `taskftp`
//! transport uses. Embedded by integration tests, and runnable on its own
//! for local trials.

pub mod config;
pub mod server;
pub mod store;

pub use server::{ServerError, ServerState, start_server};
pub use store::FileStore;
