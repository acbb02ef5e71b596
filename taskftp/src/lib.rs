//! `TaskFtp`: a task list kept in sync with one file on an FTP server.

pub mod cli;
pub mod config;
pub mod sync;
pub mod transport;
