//! # beacon-server
//!
//! HTTP server library for the beacon device presence tracker.
//!
//! This library provides the API handlers, sync sinks and state management
//! for beacon.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod cli;
pub mod logging;
pub mod sink;
pub mod state;
