//! Floodgate - Per-Route Flood Detection
//!
//! This crate implements inline admission control for HTTP services. Each
//! request is matched against an ordered list of route patterns, and clients
//! that exceed a route's request ceiling within its time window are turned
//! away with `429 Too Many Requests` and a `Retry-After` hint. Route settings
//! are persisted locally and shared between instances over a gossip mesh;
//! request counts are never shared.

pub mod admission;
pub mod config;
pub mod error;
pub mod mesh;
pub mod ratelimit;
pub mod server;
pub mod store;
