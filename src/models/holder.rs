use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an inbound connection is treated by the registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The approving authority; one reference is kept.
    Admin,
    /// A credential holder (student wallet).
    Holder,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HolderStatus {
    Active,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderConnection {
    pub connection_id: String,
    pub label: String,
    pub status: HolderStatus,
    pub connected_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub termination_reason: Option<String>,
    pub credentials_issued: u32,
    pub proofs_requested: u32,
    pub proofs_verified: u32,
}

impl HolderConnection {
    pub fn new(connection_id: String, label: String) -> Self {
        Self {
            connection_id,
            label,
            status: HolderStatus::Active,
            connected_at: Utc::now(),
            terminated_at: None,
            termination_reason: None,
            credentials_issued: 0,
            proofs_requested: 0,
            proofs_verified: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == HolderStatus::Active
    }
}
