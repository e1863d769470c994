//! Library exports for authsync, shared between the binary and tests.

pub mod auth;
pub mod config;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod startup;
pub mod state;
pub mod storage;
pub mod sync;
pub mod utils;
