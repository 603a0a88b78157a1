//! Docketsync - shared-volume docket cache and settings replication
//!
//! This crate keeps a docket cache and per-user settings in sync across
//! machines that share a mounted volume, and provides the `docketsync` CLI.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (`DocketRecord`, settings replicas)
//! - [`storage`] - SQLite store for device-local settings and the sync audit trail
//! - [`sync`] - Integrity checks, refresh planning, conflict resolution, sync service
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
