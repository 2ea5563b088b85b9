use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attribute name → value, e.g. `student_name → "Jane Doe"`.
///
/// Ordered so offers and listings present attributes in a stable order.
pub type SubjectData = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub subject_data: SubjectData,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Connection the eventual response goes back over. Lookup only.
    pub origin_connection_id: Option<String>,
    pub comment: Option<String>,
}

impl ApprovalRecord {
    pub fn pending(
        approval_id: String,
        subject_data: SubjectData,
        origin_connection_id: Option<String>,
    ) -> Self {
        Self {
            approval_id,
            subject_data,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            responded_at: None,
            origin_connection_id,
            comment: None,
        }
    }

    /// Value of a subject attribute, or `N/A` for display.
    pub fn attr(&self, name: &str) -> &str {
        self.subject_data.get(name).map(String::as_str).unwrap_or("N/A")
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn from_decision(approved: bool) -> Self {
        if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}
