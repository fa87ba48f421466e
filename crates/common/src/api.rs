//! Shared API DTOs used across the agent, aggregator, and control-plane.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node lifecycle status in the catalog (wire format uses lowercase values).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Registered, waiting for first authenticated contact.
    Pending,
    /// Seen recently over an authenticated channel.
    Active,
    /// Missed the expiry window; resurrected to pending on re-register.
    Inactive,
}

impl NodeStatus {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Active => "active",
            NodeStatus::Inactive => "inactive",
        }
    }
}

/// What kind of workload the node represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// A sampling agent on a monitored host.
    Agent,
    /// A logical fixed service hosted on one or more nodes.
    FixedService,
}

impl NodeKind {
    /// Returns the canonical kebab-case representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Agent => "agent",
            NodeKind::FixedService => "fixed-service",
        }
    }
}

/// Body of the agent→aggregator register call, reused verbatim by the
/// aggregator→control-plane validate call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCredentials {
    /// The node presenting itself.
    pub node_id: String,
    /// Cleartext token issued at first registration.
    pub token: String,
}

/// Control-plane node registration / update request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    /// Existing id for idempotent re-registration; omitted to mint one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Human-readable name.
    pub name: String,
    /// Free-form labels merged into the catalog row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, Value>>,
    /// `agent` (default) or `fixed-service`.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub kind: Option<NodeKind>,
    /// Group to attach to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Service to attach to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    /// Operator notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Caller-supplied token; when present the control plane treats the
    /// call as validation (existing node) or hashes it as-is (new node).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// One aggregator session entry as listed by `GET /api/v1/nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Node the session belongs to.
    pub node_id: String,
    /// `connected` until first activity bump, then `active`.
    pub status: String,
    /// Whether the control plane accepted this node's credentials.
    pub verified: bool,
    /// When the session was created.
    pub connected_at: DateTime<Utc>,
    /// Last register/heartbeat/metrics contact.
    pub last_active: DateTime<Utc>,
}

/// Error body returned by every tier; `code` equals the HTTP status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Short machine-readable kind.
    pub error: String,
    /// Numeric code; always the HTTP status of the response.
    pub code: u16,
    /// Human-readable description.
    pub message: String,
}

/// Success envelope used by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessBody<T> {
    /// Always `success`.
    pub status: String,
    /// Operation payload.
    pub data: T,
}

impl<T> SuccessBody<T> {
    /// Wraps `data` in the standard success envelope.
    pub fn new(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}
