//! Holder/connection registry.
//!
//! Classifies inbound connections as the admin counterparty or a holder and
//! tracks holder lifecycle. Mutations never fail: webhook delivery is
//! at-least-once and best-effort, so unknown ids are logged and ignored.

use std::collections::HashMap;

use chrono::Utc;

use crate::models::holder::{HolderConnection, HolderStatus, Role};

const ADMIN_MARKER: &str = "admin";

#[derive(Debug, Default)]
pub struct HolderRegistry {
    connections: HashMap<String, HolderConnection>,
    /// Registration order; terminated entries stay for audit display.
    order: Vec<String>,
    /// Default holder for commands that do not pick one. Always active or empty.
    primary: Option<String>,
    admin_connection: Option<String>,
}

impl HolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a newly active connection and record it.
    ///
    /// A label or alias containing "admin" (any case) marks the admin
    /// counterparty; a later admin connection replaces the earlier one.
    pub fn classify_and_register(
        &mut self,
        connection_id: &str,
        their_label: Option<&str>,
        alias: Option<&str>,
    ) -> Role {
        let is_admin = [their_label, alias]
            .iter()
            .flatten()
            .any(|s| s.to_lowercase().contains(ADMIN_MARKER));

        if is_admin {
            self.set_admin_connection(connection_id);
            return Role::Admin;
        }

        let label = [their_label, alias]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty());
        self.register_holder(connection_id, label);
        Role::Holder
    }

    /// Record a holder connection. Returns `false` if the id is already known.
    pub fn register_holder(&mut self, connection_id: &str, label: Option<&str>) -> bool {
        if let Some(existing) = self.connections.get(connection_id) {
            tracing::debug!(
                connection_id,
                status = ?existing.status,
                "holder connection already registered"
            );
            return false;
        }

        let label = match label {
            Some(l) if !l.trim().is_empty() => l.to_string(),
            _ => format!("Holder-{}", self.connections.len() + 1),
        };
        let holder = HolderConnection::new(connection_id.to_string(), label);
        tracing::info!(connection_id, label = %holder.label, "holder connected");

        self.order.push(connection_id.to_string());
        self.connections.insert(connection_id.to_string(), holder);
        if self.primary.is_none() {
            self.primary = Some(connection_id.to_string());
        }
        true
    }

    pub fn set_admin_connection(&mut self, connection_id: &str) {
        if let Some(previous) = self.admin_connection.as_deref() {
            if previous != connection_id {
                tracing::warn!(
                    previous,
                    replacement = connection_id,
                    "admin connection replaced by a newer admin-labelled connection"
                );
            }
        }
        tracing::info!(connection_id, "admin connection established");
        self.admin_connection = Some(connection_id.to_string());
    }

    /// Mark a connection terminated. Unknown ids are a logged no-op.
    ///
    /// When the primary holder goes away the first active holder (in
    /// registration order) takes over, or the pointer is cleared.
    pub fn terminate(&mut self, connection_id: &str, reason: &str) -> bool {
        if self.admin_connection.as_deref() == Some(connection_id) {
            tracing::info!(connection_id, reason, "admin connection closed");
            self.admin_connection = None;
            return true;
        }

        let Some(holder) = self.connections.get_mut(connection_id) else {
            tracing::info!(connection_id, reason, "terminate: unknown connection ignored");
            return false;
        };
        if holder.status == HolderStatus::Terminated {
            tracing::debug!(connection_id, "terminate: already terminated");
            return false;
        }

        holder.status = HolderStatus::Terminated;
        holder.terminated_at = Some(Utc::now());
        holder.termination_reason = Some(reason.to_string());
        tracing::info!(connection_id, label = %holder.label, reason, "holder connection terminated");

        if self.primary.as_deref() == Some(connection_id) {
            self.primary = self.first_active().map(|h| h.connection_id.clone());
            tracing::debug!(primary = ?self.primary, "primary holder reassigned");
        }
        true
    }

    fn first_active(&self) -> Option<&HolderConnection> {
        self.order
            .iter()
            .filter_map(|id| self.connections.get(id))
            .find(|h| h.is_active())
    }

    /// Active holders in registration order.
    pub fn active_holders(&self) -> Vec<&HolderConnection> {
        self.all().into_iter().filter(|h| h.is_active()).collect()
    }

    /// Every holder ever registered, terminated ones included.
    pub fn all(&self) -> Vec<&HolderConnection> {
        self.order
            .iter()
            .filter_map(|id| self.connections.get(id))
            .collect()
    }

    pub fn get(&self, connection_id: &str) -> Option<&HolderConnection> {
        self.connections.get(connection_id)
    }

    pub fn primary(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    pub fn admin_connection(&self) -> Option<&str> {
        self.admin_connection.as_deref()
    }

    /// Pick the holder a command should target: `preferred` when it is an
    /// active holder, otherwise the primary.
    pub fn resolve_target(&self, preferred: Option<&str>) -> Option<String> {
        if let Some(id) = preferred {
            if self.connections.get(id).map(|h| h.is_active()).unwrap_or(false) {
                return Some(id.to_string());
            }
        }
        self.primary.clone()
    }

    fn bump(&mut self, connection_id: &str, what: &str, f: impl FnOnce(&mut HolderConnection)) -> bool {
        match self.connections.get_mut(connection_id) {
            Some(holder) => {
                f(holder);
                true
            }
            None => {
                tracing::debug!(connection_id, counter = what, "counter update for unknown connection ignored");
                false
            }
        }
    }

    pub fn increment_issued(&mut self, connection_id: &str) -> bool {
        self.bump(connection_id, "credentials_issued", |h| h.credentials_issued += 1)
    }

    pub fn increment_requested(&mut self, connection_id: &str) -> bool {
        self.bump(connection_id, "proofs_requested", |h| h.proofs_requested += 1)
    }

    pub fn increment_verified(&mut self, connection_id: &str) -> bool {
        self.bump(connection_id, "proofs_verified", |h| h.proofs_verified += 1)
    }
}
