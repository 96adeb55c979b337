//! # guardian-server
//!
//! HTTP server library for the guardian separation alarm.
//!
//! This library wires the monitor pipeline from configuration and exposes
//! the API handlers, the messaging relay client and state management.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod relay;
pub mod service;
pub mod state;
