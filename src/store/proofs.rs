//! Presentations the verifier has seen verified, in arrival order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct VerifiedProof {
    pub pres_ex_id: String,
    pub connection_id: Option<String>,
    pub verified_at: DateTime<Utc>,
    /// Revealed attribute referent → raw value.
    pub revealed: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct ProofLog {
    proofs: Vec<VerifiedProof>,
}

impl ProofLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if this exchange was already recorded.
    pub fn record(
        &mut self,
        pres_ex_id: &str,
        connection_id: Option<&str>,
        revealed: BTreeMap<String, String>,
    ) -> bool {
        if self.proofs.iter().any(|p| p.pres_ex_id == pres_ex_id) {
            return false;
        }
        self.proofs.push(VerifiedProof {
            pres_ex_id: pres_ex_id.to_string(),
            connection_id: connection_id.map(str::to_string),
            verified_at: Utc::now(),
            revealed,
        });
        true
    }

    pub fn all(&self) -> &[VerifiedProof] {
        &self.proofs
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }
}
