//! Message filter pipeline
//!
//! Ordered, named, individually toggleable transformers that see every
//! message crossing the bridge in either direction. A filter may pass,
//! rewrite, silently drop, or block a message; blocking synthesizes a
//! JSON-RPC error back to the originating side.

pub mod builtin;
pub mod chain;
pub mod content;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sb_protocol::JsonRpcError;

pub use builtin::{AddBridgeMeta, RedactSecrets};
pub use chain::{ChainOutcome, FilterChain};
pub use content::{
    BlacklistFilter, ContentFilterConfig, ContentState, HtmlSanitizer, PiiRedactor, SizeManager,
};

/// Direction a message is travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FilterDirection {
    /// Client toward the child
    Outbound,
    /// Child toward the client(s)
    Inbound,
}

/// Which directions a filter wants to see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DirectionMask {
    Outbound,
    Inbound,
    Both,
}

impl DirectionMask {
    pub fn matches(&self, direction: FilterDirection) -> bool {
        match self {
            DirectionMask::Both => true,
            DirectionMask::Outbound => direction == FilterDirection::Outbound,
            DirectionMask::Inbound => direction == FilterDirection::Inbound,
        }
    }
}

/// Outcome of a single filter invocation
#[derive(Debug)]
pub enum FilterResult {
    /// Message unchanged
    Pass,
    /// Message replaced
    Transform(Value),
    /// Message discarded with no reply to anyone
    Drop { reason: String },
    /// Message discarded; this error goes back to the originating side
    Block { error: JsonRpcError },
}

/// A named unit in the filter chain
///
/// `apply` must be pure apart from the filter's own counters and must not
/// perform blocking I/O.
pub trait MessageFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    fn direction_mask(&self) -> DirectionMask;

    fn apply(&self, direction: FilterDirection, session_id: &str, message: &Value)
        -> FilterResult;

    /// Per-filter counter snapshot for `/filters/metrics`
    fn metrics(&self) -> Value {
        Value::Object(Default::default())
    }
}

/// Listing entry for `GET /filters`
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FilterInfo {
    pub name: String,
    pub enabled: bool,
    pub direction_mask: DirectionMask,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
