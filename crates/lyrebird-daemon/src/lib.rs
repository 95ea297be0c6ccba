//! lyrebird-daemon
//!
//! Runs the two faces of the mock server:
//! - a catch-all gRPC surface that impersonates registered methods
//! - the HTTP management API for services, method descriptions and stubs

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod dispatch;
pub mod grpc;
pub mod http;
pub mod registry;
pub mod telemetry;

pub use crate::registry::MockState;
