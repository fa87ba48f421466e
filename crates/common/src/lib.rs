//! Shared building blocks for the SysLens workspace.
//!
//! Keep cross-crate wire types, the metric schema, and the transport
//! envelope codec here so the agent, aggregator, and control-plane agree
//! on one definition of each.

#![warn(missing_docs)]

/// Shared API DTOs and transport header names.
pub mod api;
/// Transport envelope codec (gzip + AES-256-GCM framing).
pub mod envelope;
/// The typed system-metrics schema carried through the pipeline.
pub mod stats;
/// Node credential helpers: generation, hashing, escrow.
pub mod token;
