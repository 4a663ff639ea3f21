//! pollmesh scheduler library.
//!
//! This crate primarily ships a `scheduler` binary, but we expose the
//! service and router as a library to enable integration testing.

pub mod api;
pub mod command;
pub mod config;
pub mod counters;
pub mod error;
pub mod heartbeat;
pub mod lock;
pub mod monitor;
pub mod placement;
pub mod rebalance;
pub mod registry;
pub mod service;
pub mod state;
pub mod subscriptions;
