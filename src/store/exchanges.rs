//! Explicit state per credential exchange.
//!
//! The agent re-delivers webhooks, so "has this exchange already been
//! issued?" is answered from a per-exchange state rather than from whether
//! some field happens to be set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::event::ExchangeStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExchangeState {
    OfferSent,
    RequestReceived,
    Issued,
    Done,
    Abandoned,
}

impl ExchangeState {
    fn from_stage(stage: &ExchangeStage) -> Option<Self> {
        match stage {
            ExchangeStage::OfferSent => Some(ExchangeState::OfferSent),
            ExchangeStage::RequestReceived => Some(ExchangeState::RequestReceived),
            ExchangeStage::CredentialIssued => Some(ExchangeState::Issued),
            ExchangeStage::Done => Some(ExchangeState::Done),
            ExchangeStage::Abandoned => Some(ExchangeState::Abandoned),
            ExchangeStage::Other(_) => None,
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, ExchangeState::Done | ExchangeState::Abandoned)
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeRecord {
    pub cred_ex_id: String,
    pub connection_id: Option<String>,
    /// Approval that authorised the offer, when known.
    pub approval_id: Option<String>,
    pub state: ExchangeState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ExchangeLedger {
    exchanges: HashMap<String, ExchangeRecord>,
}

impl ExchangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an offer this console just sent.
    pub fn offer_sent(
        &mut self,
        cred_ex_id: &str,
        connection_id: &str,
        approval_id: Option<&str>,
    ) {
        self.exchanges.insert(
            cred_ex_id.to_string(),
            ExchangeRecord {
                cred_ex_id: cred_ex_id.to_string(),
                connection_id: Some(connection_id.to_string()),
                approval_id: approval_id.map(str::to_string),
                state: ExchangeState::OfferSent,
                updated_at: Utc::now(),
            },
        );
    }

    /// Apply a webhook stage. Returns the new state only when it moved
    /// forward, so callers act on each transition once.
    pub fn advance(
        &mut self,
        cred_ex_id: &str,
        connection_id: Option<&str>,
        stage: &ExchangeStage,
    ) -> Option<ExchangeState> {
        let next = ExchangeState::from_stage(stage)?;
        let record = self
            .exchanges
            .entry(cred_ex_id.to_string())
            .or_insert_with(|| ExchangeRecord {
                cred_ex_id: cred_ex_id.to_string(),
                connection_id: None,
                approval_id: None,
                state: ExchangeState::OfferSent,
                updated_at: Utc::now(),
            });
        if record.connection_id.is_none() {
            record.connection_id = connection_id.map(str::to_string);
        }

        let moves = if record.state.is_final() {
            false
        } else if next == ExchangeState::Abandoned {
            true
        } else {
            next > record.state
        };

        if !moves {
            tracing::debug!(cred_ex_id, state = ?record.state, ?stage, "exchange stage already seen");
            return None;
        }
        record.state = next;
        record.updated_at = Utc::now();
        Some(next)
    }

    /// Step back from `RequestReceived` after the issue call failed, so a
    /// re-delivered request triggers another attempt. Returns whether the
    /// record was rolled back.
    pub fn issue_failed(&mut self, cred_ex_id: &str) -> bool {
        match self.exchanges.get_mut(cred_ex_id) {
            Some(record) if record.state == ExchangeState::RequestReceived => {
                record.state = ExchangeState::OfferSent;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, cred_ex_id: &str) -> Option<&ExchangeRecord> {
        self.exchanges.get(cred_ex_id)
    }

    pub fn connection_for(&self, cred_ex_id: &str) -> Option<&str> {
        self.exchanges
            .get(cred_ex_id)
            .and_then(|r| r.connection_id.as_deref())
    }
}
