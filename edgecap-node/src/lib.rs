//! # edgecap-node: Edge Capture Node Service
//!
//! Foreground service that watches a trigger sensor, captures a frame on
//! each trigger, and hands it to the `edgecap-core` delivery pipeline.
//!
//! ## Pieces
//!
//! - **config**: TOML configuration, validation and CLI overrides.
//! - **hardware**: sysfs GPIO sensor and indicator, file and synthetic cameras.
//! - **service**: pipeline supervision, stats logging and `SIGHUP` reload.

pub mod config;
pub mod hardware;
pub mod service;
