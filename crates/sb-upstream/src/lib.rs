//! Upstream child process layer
//!
//! Owns the single stdio JSON-RPC subprocess: line framing over its
//! stdin/stdout, stderr draining, health tracking, and supervised restarts.

pub mod framing;
pub mod supervisor;

pub use framing::{read_message, write_message, FrameReader, DEFAULT_MAX_FRAME_BYTES};
pub use supervisor::{ChildConfig, ChildState, ChildSupervisor, UpstreamEvent, UpstreamHandle};
