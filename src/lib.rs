//! promptcast - realtime session client for live classroom presentations
//!
//! This crate provides the client side of a presentation session:
//! - Push channel connections with heartbeat and bounded reconnect
//! - A typed codec for the JSON wire messages
//! - Server-synchronized countdown timers
//! - Room display pairing over a short code
//!
//! # Architecture
//!
//! Participants, instructors and room displays each hold one connection:
//! - The server pushes prompts, group data, timers and summaries
//! - Every inbound message becomes a new [`client::SessionSnapshot`]
//! - Consumers watch the snapshot instead of handling messages themselves
//! - Session metadata and pairing codes come from the HTTP [`api`]

pub mod api;
pub mod client;
pub mod config;
pub mod protocol;
