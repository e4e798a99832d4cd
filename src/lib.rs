//! # channelsync Library
//!
//! This library provides the core functionality for the channelsync
//! service: the bulk inventory/pricing synchronization engine, target-system
//! adapters, persistence, and the HTTP surface.

pub mod adapters;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod tiers;
pub use migration;
