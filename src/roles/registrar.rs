//! Registrar: asks the admin to approve a student's registration, then
//! offers the approved credential to a holder and issues it when the holder
//! requests it.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::{fmt_time, proof_request_url, Flow, RoleHandler, Session};
use crate::agent::client::string_field;
use crate::console::Console;
use crate::errors::{AppError, AppResult};
use crate::models::approval::{ApprovalStatus, SubjectData};
use crate::models::envelope::{ApprovalResponse, Envelope, Inbound};
use crate::models::event::{
    AgentEvent, BasicMessageEvent, ConnectionEvent, CredentialExchangeEvent, PresentationEvent,
};
use crate::models::holder::Role;
use crate::payload::offer::{credential_offer, issue_body, OfferSpec};
use crate::payload::proof::{university_proof_request, ProofSpec};
use crate::payload::revoke_body;
use crate::store::approvals::ApprovalTracker;
use crate::store::exchanges::{ExchangeLedger, ExchangeState};
use crate::store::holders::HolderRegistry;
use crate::watch::ConnectionState;

/// Fields collected for an approval request, in prompt order.
pub const STUDENT_FIELDS: [(&str, &str); 5] = [
    ("student_id", "student ID"),
    ("student_name", "student name"),
    ("university_name", "university name"),
    ("graduation_year", "graduation year"),
    ("cgpa", "CGPA"),
];

pub struct Registrar {
    session: Session,
    approvals: ApprovalTracker,
    holders: HolderRegistry,
    exchanges: ExchangeLedger,
    trace: bool,
}

/// One row of the connection status view.
#[derive(Debug)]
pub struct ConnectionStatus {
    pub role: &'static str,
    /// `None` when no such connection exists yet.
    pub connection: Option<(String, AppResult<String>)>,
}

impl Registrar {
    pub fn new(session: Session) -> Self {
        let trace = session.cfg.trace;
        Self {
            session,
            approvals: ApprovalTracker::new(),
            holders: HolderRegistry::new(),
            exchanges: ExchangeLedger::new(),
            trace,
        }
    }

    pub fn approvals(&self) -> &ApprovalTracker {
        &self.approvals
    }

    pub fn holders(&self) -> &HolderRegistry {
        &self.holders
    }

    pub fn exchanges(&self) -> &ExchangeLedger {
        &self.exchanges
    }

    // ── Events ───────────────────────────────────────────────────

    pub fn on_connection(&mut self, ev: &ConnectionEvent) {
        let id = ev.connection_id.as_str();
        let state = self.session.watch.observe(id, ev.connection_state());

        match state {
            ConnectionState::Active => {
                if self.holders.admin_connection() == Some(id) || self.holders.get(id).is_some() {
                    tracing::debug!(connection_id = id, "connection already classified");
                    return;
                }
                match self.holders.classify_and_register(
                    id,
                    ev.their_label.as_deref(),
                    ev.alias.as_deref(),
                ) {
                    Role::Admin => println!("Connected to admin agent: {}", id),
                    Role::Holder => {
                        let label = self.holders.get(id).map(|h| h.label.as_str()).unwrap_or("");
                        println!("Holder connected: {} ({})", label, id);
                    }
                }
            }
            ConnectionState::Terminated => {
                self.holders.terminate(id, &format!("connection_{}", ev.state));
            }
            ConnectionState::Pending => {
                tracing::debug!(connection_id = id, state = %ev.state, "connection progressing");
            }
        }
    }

    /// Decode a basic message. Malformed envelopes are logged and dropped.
    pub fn on_basic_message(&mut self, ev: &BasicMessageEvent) {
        let from = ev.connection_id.as_deref().unwrap_or("unknown");
        match Envelope::decode(&ev.content) {
            Err(e) => {
                tracing::warn!(connection_id = from, "dropping malformed approval message: {}", e);
            }
            Ok(Inbound::Text(text)) => println!("Message from {}: {}", from, text),
            Ok(Inbound::Envelope(Envelope::ApprovalResponse(resp))) => {
                self.on_approval_response(resp)
            }
            Ok(Inbound::Envelope(Envelope::ApprovalRequest(req))) => {
                tracing::info!(
                    approval_id = %req.approval_id,
                    "registrar does not answer approval requests, ignoring"
                );
            }
        }
    }

    fn on_approval_response(&mut self, resp: ApprovalResponse) {
        let id = resp.approval_id.as_str();
        match self.approvals.record_response(id, resp.approved, &resp.comments) {
            Ok(true) if resp.approved => {
                let name = self
                    .approvals
                    .get(id)
                    .map(|r| r.attr("student_name").to_string())
                    .unwrap_or_default();
                println!("Approval {} APPROVED for {}. Use option 6 to issue.", id, name);
            }
            Ok(true) => {
                // nothing left to do for a rejection
                if let Ok(record) = self.approvals.consume(id) {
                    println!(
                        "Approval {} REJECTED for {}: {}",
                        id,
                        record.attr("student_name"),
                        record.comment.as_deref().unwrap_or("no reason given")
                    );
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("approval response dropped: {}", e),
        }
    }

    pub async fn on_credential_exchange(&mut self, ev: &CredentialExchangeEvent) {
        let stage = ev.stage();
        let Some(state) =
            self.exchanges
                .advance(&ev.cred_ex_id, ev.connection_id.as_deref(), &stage)
        else {
            return;
        };

        match state {
            ExchangeState::RequestReceived => {
                if let Err(e) = self.issue_credential(ev).await {
                    tracing::error!(cred_ex_id = %ev.cred_ex_id, "credential issue failed: {}", e);
                    println!("Error issuing credential for exchange {}: {}", ev.cred_ex_id, e);
                    // not issued: the next request-received delivery tries again
                    self.exchanges.issue_failed(&ev.cred_ex_id);
                }
            }
            ExchangeState::Done => self.on_issued(ev).await,
            ExchangeState::Abandoned => {
                tracing::warn!(cred_ex_id = %ev.cred_ex_id, "credential exchange abandoned");
                println!("Credential exchange {} was abandoned", ev.cred_ex_id);
            }
            ExchangeState::OfferSent | ExchangeState::Issued => {
                tracing::info!(cred_ex_id = %ev.cred_ex_id, state = %ev.state, "credential exchange");
            }
        }
    }

    async fn issue_credential(&self, ev: &CredentialExchangeEvent) -> AppResult<()> {
        let client = &self.session.client;
        let preview = if ev.v2 {
            match client.get_cred_ex_record(&ev.cred_ex_id).await {
                Ok(record) => record
                    .get("cred_preview")
                    .or_else(|| record.pointer("/cred_offer/credential_preview"))
                    .cloned(),
                Err(e) => {
                    tracing::warn!(cred_ex_id = %ev.cred_ex_id, "no exchange record, issuing without preview: {}", e);
                    None
                }
            }
        } else {
            None
        };

        client
            .issue(&ev.cred_ex_id, ev.v2, &issue_body(&ev.cred_ex_id, preview))
            .await?;
        println!("Credential issued for exchange {}", ev.cred_ex_id);
        Ok(())
    }

    async fn on_issued(&mut self, ev: &CredentialExchangeEvent) {
        let conn = ev
            .connection_id
            .clone()
            .or_else(|| self.exchanges.connection_for(&ev.cred_ex_id).map(str::to_string));
        let Some(conn) = conn else {
            tracing::warn!(cred_ex_id = %ev.cred_ex_id, "completed exchange has no connection");
            return;
        };

        self.holders.increment_issued(&conn);
        println!("Credential exchange {} complete for {}", ev.cred_ex_id, conn);

        if !self.session.cfg.auto_terminate || self.holders.admin_connection() == Some(conn.as_str()) {
            return;
        }
        // best effort: the credential is already issued
        match self.session.client.delete_connection(&conn).await {
            Ok(()) | Err(AppError::NotFound { .. }) => {
                self.session.watch.observe(&conn, ConnectionState::Terminated);
                self.holders.terminate(&conn, "credential_issued");
            }
            Err(e) => tracing::warn!(connection_id = %conn, "auto-terminate failed: {}", e),
        }
    }

    fn on_presentation(&mut self, ev: &PresentationEvent) {
        if !ev.is_verified() {
            tracing::info!(pres_ex_id = %ev.pres_ex_id, state = %ev.state, "presentation exchange");
            return;
        }
        println!("Proof {} verified", ev.pres_ex_id);
        for (name, value) in ev.revealed_attrs() {
            println!("  {}: {}", name, value);
        }
    }

    // ── Operations ───────────────────────────────────────────────

    /// Record a new approval request and send it to the admin.
    pub async fn request_approval(&mut self, data: SubjectData) -> AppResult<String> {
        let admin = self
            .holders
            .admin_connection()
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::InvalidUserInput("no admin connection; use option 5 first".into())
            })?;
        self.session
            .client
            .await_active(&self.session.watch, &admin, self.session.cfg.connect_timeout())
            .await?;

        let approval_id = self.approvals.submit(data.clone());
        let sent = match Envelope::request(&approval_id, data, &self.session.cfg.party_id).encode() {
            Ok(content) => self.session.client.send_message(&admin, &content).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::warn!(approval_id = %approval_id, "approval request not delivered: {}", e);
            // the admin never saw it, so nobody can answer it
            self.approvals.withdraw(&approval_id)?;
            return Err(e);
        }
        tracing::info!(approval_id = %approval_id, admin_connection = %admin, "approval requested");
        Ok(approval_id)
    }

    /// Offer the credential of an approved request to `connection_id`.
    /// The approval is consumed once the agent accepted the offer.
    pub async fn issue_approved(
        &mut self,
        approval_id: &str,
        connection_id: &str,
    ) -> AppResult<String> {
        let record = self
            .approvals
            .get(approval_id)
            .ok_or_else(|| AppError::not_found("approval", approval_id))?;
        if record.status != ApprovalStatus::Approved {
            return Err(AppError::InvalidUserInput(format!(
                "approval {} is {}",
                approval_id, record.status
            )));
        }
        if !self.holders.get(connection_id).map(|h| h.is_active()).unwrap_or(false) {
            return Err(AppError::InvalidUserInput(format!(
                "holder connection {} is not active",
                connection_id
            )));
        }

        let cfg = &self.session.cfg;
        let body = credential_offer(&OfferSpec {
            aip: cfg.aip,
            format: cfg.cred_format,
            cred_def_id: &cfg.cred_def_id,
            issuer_did: &cfg.issuer_did,
            connection_id,
            attributes: &record.subject_data,
            trace: self.trace,
            issued_at: Utc::now(),
        })?;

        self.session
            .client
            .await_active(&self.session.watch, connection_id, self.session.cfg.connect_timeout())
            .await?;
        let cred_ex_id = self.session.client.send_offer(self.session.cfg.aip, &body).await?;

        self.exchanges.offer_sent(&cred_ex_id, connection_id, Some(approval_id));
        self.approvals.consume(approval_id)?;
        tracing::info!(approval_id, connection_id, cred_ex_id = %cred_ex_id, "credential offered");
        Ok(cred_ex_id)
    }

    /// Accept the admin's invitation and remember the resulting connection.
    pub async fn connect_admin(&mut self, invitation: &Value) -> AppResult<String> {
        let connection_id = self.session.client.receive_invitation(invitation).await?;
        self.holders.set_admin_connection(&connection_id);
        Ok(connection_id)
    }

    /// Ask the agent for the current state of the admin connection and the
    /// primary holder. A failed lookup only marks its own row.
    pub async fn connection_status(&self) -> Vec<ConnectionStatus> {
        let rows = [
            ("admin", self.holders.admin_connection()),
            ("holder", self.holders.primary()),
        ];
        let mut out = Vec::with_capacity(rows.len());
        for (role, id) in rows {
            let connection = match id {
                Some(id) => {
                    let state = match self.session.client.get_connection(id).await {
                        Ok(record) => string_field(&record, &["state"], "connection record"),
                        Err(e) => Err(e),
                    };
                    Some((id.to_string(), state))
                }
                None => None,
            };
            out.push(ConnectionStatus { role, connection });
        }
        out
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn cmd_request_approval(&mut self, console: &mut Console) -> AppResult<()> {
        if self.holders.admin_connection().is_none() {
            println!("No connection to admin established. Please use option 5 first.");
            return Ok(());
        }
        let mut data = SubjectData::new();
        for (field, label) in STUDENT_FIELDS {
            let value = console.prompt(&format!("Enter {}: ", label)).await?;
            data.insert(field.to_string(), value);
        }
        let id = self.request_approval(data).await?;
        println!("Approval request {} sent. Waiting for admin response...", id);
        Ok(())
    }

    async fn cmd_proof_request(&mut self, connectionless: bool) -> AppResult<()> {
        let target = if connectionless {
            None
        } else {
            Some(self.holders.resolve_target(None).ok_or_else(|| {
                AppError::InvalidUserInput("no active holder connection".into())
            })?)
        };

        let cfg = &self.session.cfg;
        let body = university_proof_request(&ProofSpec {
            aip: cfg.aip,
            format: cfg.cred_format,
            revocation: cfg.revocation,
            self_attested: cfg.self_attested,
            trace: self.trace,
            connection_id: target.as_deref(),
            now: Utc::now().timestamp(),
        })?;

        match target {
            Some(conn) => {
                self.session.client.send_proof_request(cfg.aip, &body).await?;
                self.holders.increment_requested(&conn);
                println!("Proof request sent to {}", conn);
            }
            None => {
                let record = self.session.client.create_proof_request(cfg.aip, &body).await?;
                let id = string_field(
                    &record,
                    &["pres_ex_id", "presentation_exchange_id"],
                    "create-request response",
                )?;
                println!("Proof request url: {}", proof_request_url(&self.session.cfg, &id));
            }
        }
        Ok(())
    }

    async fn cmd_send_message(&mut self, console: &mut Console) -> AppResult<()> {
        let Some(conn) = self.holders.resolve_target(None) else {
            println!("No student connection established.");
            return Ok(());
        };
        let msg = console.prompt("Enter message: ").await?;
        self.session.client.send_message(&conn, &msg).await?;
        Ok(())
    }

    async fn cmd_create_invitation(&mut self) -> AppResult<()> {
        let alias = format!("{} holder", self.session.cfg.party_id);
        let invitation = self.session.client.create_invitation(&alias).await?;
        print_invitation(&invitation);
        println!("Connection will be tracked automatically when established.");
        Ok(())
    }

    async fn cmd_connect_admin(&mut self, console: &mut Console) -> AppResult<()> {
        println!("Paste the admin invitation JSON and press Enter:");
        let raw = console.prompt("").await?;
        let invitation: Value = serde_json::from_str(&raw)
            .map_err(|e| AppError::InvalidUserInput(format!("invitation is not valid JSON: {}", e)))?;

        let id = self.connect_admin(&invitation).await?;
        println!("Connecting to admin agent: {}", id);
        match self
            .session
            .client
            .await_active(&self.session.watch, &id, self.session.cfg.connect_timeout())
            .await
        {
            Ok(()) => println!("Admin connection active. Use option 1 to request approvals."),
            Err(e) => println!("Admin connection {} not active yet: {}", id, e),
        }
        Ok(())
    }

    async fn cmd_process_approved(&mut self, console: &mut Console) -> AppResult<()> {
        let approved: Vec<(String, String)> = self
            .approvals
            .list_by_status(ApprovalStatus::Approved)
            .into_iter()
            .map(|r| {
                (
                    r.approval_id.clone(),
                    format!(
                        "{}: {} - {}",
                        r.approval_id,
                        r.attr("student_name"),
                        r.attr("university_name")
                    ),
                )
            })
            .collect();
        if approved.is_empty() {
            println!("No approved credentials to process.");
            return Ok(());
        }

        let holders: Vec<(String, String)> = self
            .holders
            .active_holders()
            .into_iter()
            .map(|h| (h.connection_id.clone(), format!("{} ({})", h.label, h.connection_id)))
            .collect();
        if holders.is_empty() {
            println!("No active holder connections. Cannot issue credentials.");
            return Ok(());
        }

        let labels: Vec<String> = approved.iter().map(|(_, l)| l.clone()).collect();
        let i = console.choose("APPROVED CREDENTIALS", &labels).await?;
        let labels: Vec<String> = holders.iter().map(|(_, l)| l.clone()).collect();
        let j = console.choose("ACTIVE HOLDER CONNECTIONS", &labels).await?;

        let cred_ex_id = self.issue_approved(&approved[i].0, &holders[j].0).await?;
        println!("Credential offer sent (exchange {})", cred_ex_id);
        Ok(())
    }

    fn print_approvals(&self) {
        let all = self.approvals.list_all();
        if all.is_empty() {
            println!("No approval requests.");
            return;
        }
        println!("\n=== APPROVAL REQUESTS ===");
        for r in all {
            println!("\nApproval ID: {}", r.approval_id);
            println!("Status: {}", r.status);
            println!("Request Time: {}", fmt_time(&r.created_at));
            println!("Student: {} - {}", r.attr("student_name"), r.attr("university_name"));
            println!(
                "Graduation Year: {} | CGPA: {}",
                r.attr("graduation_year"),
                r.attr("cgpa")
            );
        }
    }

    async fn cmd_connection_status(&self) {
        println!("Connection Status:");
        for row in self.connection_status().await {
            match row.connection {
                None => println!("  {}: not connected", row.role),
                Some((id, Ok(state))) => println!("  {}: {} ({})", row.role, id, state),
                Some((id, Err(e))) => {
                    tracing::warn!(connection_id = %id, "connection status lookup failed: {}", e);
                    println!("  {}: {} (error retrieving status)", row.role, id);
                }
            }
        }
    }

    fn print_holders(&self) {
        let active = self.holders.active_holders();
        if active.is_empty() {
            println!("No active holder connections.");
        } else {
            println!("\n=== ACTIVE HOLDER CONNECTIONS ===");
            for h in &active {
                println!("\nConnection ID: {}", h.connection_id);
                println!("Label: {}", h.label);
                println!("Connected: {}", fmt_time(&h.connected_at));
                println!("Credentials Issued: {}", h.credentials_issued);
            }
        }

        let all = self.holders.all();
        let terminated: Vec<_> = all.iter().filter(|h| !h.is_active()).collect();
        if !terminated.is_empty() {
            println!("\n=== TERMINATED CONNECTIONS ({}) ===", terminated.len());
            for h in terminated.iter().rev().take(5) {
                println!(
                    "{}: {} at {}",
                    h.label,
                    h.termination_reason.as_deref().unwrap_or("unknown"),
                    h.terminated_at.as_ref().map(fmt_time).unwrap_or_default()
                );
            }
        }
        println!(
            "\nTotal: {}  Active: {}  Terminated: {}",
            all.len(),
            active.len(),
            terminated.len()
        );
    }

    // ── Revocation ───────────────────────────────────────────────

    async fn cmd_revoke(&mut self, console: &mut Console) -> AppResult<()> {
        let rev_reg_id = console.prompt("Enter revocation registry ID: ").await?;
        let cred_rev_id = console.prompt("Enter credential revocation ID: ").await?;
        if rev_reg_id.is_empty() || cred_rev_id.is_empty() {
            return Err(AppError::InvalidUserInput(
                "registry id and credential revocation id are required".into(),
            ));
        }
        let publish = console.confirm("Publish now?", false).await?;
        let body = revoke_body(&rev_reg_id, &cred_rev_id, publish, self.holders.primary());
        self.session.client.revoke(&body).await?;
        println!("Revoked credential {} in {}", cred_rev_id, rev_reg_id);
        Ok(())
    }

    async fn cmd_publish(&mut self) -> AppResult<()> {
        let resp = self.session.client.publish_revocations().await?;
        let registries: Vec<&String> = resp
            .get("rrid2crid")
            .and_then(Value::as_object)
            .map(|m| m.keys().collect())
            .unwrap_or_default();
        println!(
            "Published revocations for {} revocation registr{}: {:?}",
            registries.len(),
            if registries.len() == 1 { "y" } else { "ies" },
            registries
        );
        Ok(())
    }

    async fn cmd_rotate(&mut self) -> AppResult<()> {
        let cred_def_id = self.session.cfg.cred_def_id.clone();
        if cred_def_id.is_empty() {
            return Err(AppError::InvalidUserInput(
                "no credential definition id configured (UNICRED_CRED_DEF_ID)".into(),
            ));
        }
        let resp = self.session.client.rotate_registry(&cred_def_id).await?;
        println!(
            "Rotated registries for {}. Decommissioned: {}",
            cred_def_id,
            resp.get("rev_reg_ids").cloned().unwrap_or(Value::Null)
        );
        Ok(())
    }

    async fn cmd_list_registries(&mut self, console: &mut Console) -> AppResult<()> {
        let (states, default) = self.session.client.registry_states();
        let state = console
            .prompt_default(&format!("Filter by state {:?}", states), default)
            .await?;
        let state = if states.contains(&state.as_str()) {
            state
        } else {
            default.to_string()
        };
        let resp = self.session.client.list_registries(&state).await?;
        println!(
            "Registries (state = '{}'): {}",
            state,
            resp.get("rev_reg_ids").cloned().unwrap_or(Value::Null)
        );
        Ok(())
    }
}

pub(crate) fn print_invitation(invitation: &Value) {
    if let Some(url) = invitation.get("invitation_url").and_then(Value::as_str) {
        println!("Invitation URL: {}", url);
    }
    if let Some(inv) = invitation.get("invitation") {
        println!("\n{}", "=".repeat(50));
        println!("COPY THE FULL LINE BELOW:");
        println!("{}", "=".repeat(50));
        println!("{}", inv);
        println!("{}", "=".repeat(50));
    }
}

#[async_trait]
impl RoleHandler for Registrar {
    fn name(&self) -> &'static str {
        "registrar"
    }

    fn print_menu(&self) {
        let mut menu = String::from(
            "\n    (1) Request Credential Approval from Admin\n\
             \x20   (2) Send Proof Request\n\
             \x20   (2a) Send *Connectionless* Proof Request\n\
             \x20   (3) Send Message\n\
             \x20   (4) Create New Invitation\n\
             \x20   (5) Connect to Admin Agent\n\
             \x20   (6) Process Approved Credential\n\
             \x20   (7) List Approval Requests\n\
             \x20   (7a) List Holder Connections\n\
             \x20   (S) Show Connection Status\n",
        );
        if self.session.cfg.revocation {
            menu.push_str(
                "    (8) Revoke Credential\n\
                 \x20   (9) Publish Revocations\n\
                 \x20   (10) Rotate Revocation Registry\n\
                 \x20   (11) List Revocation Registries\n",
            );
        }
        menu.push_str("    (T) Toggle tracing on credential/proof exchange\n    (X) Exit?\n");
        println!("{}", menu);
    }

    async fn on_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Connection(ev) => self.on_connection(&ev),
            AgentEvent::BasicMessage(ev) => self.on_basic_message(&ev),
            AgentEvent::IssueCredential(ev) => self.on_credential_exchange(&ev).await,
            AgentEvent::PresentProof(ev) => self.on_presentation(&ev),
            AgentEvent::Other { topic } => tracing::debug!(topic, "unhandled topic"),
        }
    }

    async fn on_command(&mut self, command: &str, console: &mut Console) -> AppResult<Flow> {
        let revocation = self.session.cfg.revocation;
        match command.to_lowercase().as_str() {
            "1" => self.cmd_request_approval(console).await?,
            "2" => self.cmd_proof_request(false).await?,
            "2a" => self.cmd_proof_request(true).await?,
            "3" => self.cmd_send_message(console).await?,
            "4" => self.cmd_create_invitation().await?,
            "5" => self.cmd_connect_admin(console).await?,
            "6" => self.cmd_process_approved(console).await?,
            "7" => self.print_approvals(),
            "7a" => self.print_holders(),
            "s" => self.cmd_connection_status().await,
            "8" if revocation => self.cmd_revoke(console).await?,
            "9" if revocation => self.cmd_publish().await?,
            "10" if revocation => self.cmd_rotate().await?,
            "11" if revocation => self.cmd_list_registries(console).await?,
            "t" => {
                self.trace = !self.trace;
                println!(
                    ">>> Credential/Proof Exchange Tracing is {}",
                    if self.trace { "ON" } else { "OFF" }
                );
            }
            "x" => return Ok(Flow::Exit),
            other => {
                return Err(AppError::InvalidUserInput(format!("unknown option '{}'", other)))
            }
        }
        Ok(Flow::Continue)
    }

    fn open_connections(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .holders
            .active_holders()
            .into_iter()
            .map(|h| h.connection_id.clone())
            .collect();
        if let Some(admin) = self.holders.admin_connection() {
            ids.push(admin.to_string());
        }
        ids
    }

    fn session(&self) -> &Session {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::agent::AdminClient;
    use crate::config::Config;
    use crate::watch::ConnectionWatch;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn registrar() -> Registrar {
        let cfg = Config::default();
        Registrar::new(Session {
            client: AdminClient::new(&cfg).unwrap(),
            watch: ConnectionWatch::new(),
            cfg,
        })
    }

    fn message(content: &str) -> BasicMessageEvent {
        BasicMessageEvent {
            connection_id: Some("conn-admin".into()),
            message_id: None,
            content: content.into(),
        }
    }

    #[test]
    fn test_malformed_message_logged_once_and_state_unchanged() {
        let mut reg = registrar();
        let mut data = SubjectData::new();
        data.insert("student_name".into(), "Jane".into());
        let id = reg.approvals.submit(data);

        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            reg.on_basic_message(&message(
                r#"{"type": "credential_approval_response", "approved": "maybe"}"#,
            ));
        });

        let logged = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logged.lines().count(), 1, "log output: {}", logged);
        assert!(logged.contains("malformed approval message"));
        assert_eq!(reg.approvals.len(), 1);
        assert_eq!(reg.approvals.get(&id).unwrap().status, ApprovalStatus::Pending);
    }

    #[test]
    fn test_rejection_is_consumed_and_approval_kept() {
        let mut reg = registrar();
        let yes = reg.approvals.submit(SubjectData::new());
        let no = reg.approvals.submit(SubjectData::new());

        reg.on_basic_message(&message(
            &Envelope::response(&yes, true, "ok", "ADMIN001").encode().unwrap(),
        ));
        reg.on_basic_message(&message(
            &Envelope::response(&no, false, "missing transcript", "ADMIN001")
                .encode()
                .unwrap(),
        ));

        assert_eq!(reg.approvals.get(&yes).unwrap().status, ApprovalStatus::Approved);
        assert!(reg.approvals.get(&no).is_none());
    }

    #[test]
    fn test_legacy_response_spelling_accepted() {
        let mut reg = registrar();
        let id = reg.approvals.submit(SubjectData::new());
        let legacy = format!(
            r#"{{"type": "approval_response", "cred_ex_id": "{}", "approved": true}}"#,
            id
        );
        reg.on_basic_message(&message(&legacy));
        assert_eq!(reg.approvals.get(&id).unwrap().status, ApprovalStatus::Approved);
    }

    #[test]
    fn test_connection_events_classify_and_terminate() {
        let mut reg = registrar();
        let conn = |id: &str, state: &str, label: Option<&str>| ConnectionEvent {
            connection_id: id.into(),
            state: state.into(),
            rfc23_state: None,
            their_label: label.map(str::to_string),
            alias: None,
        };

        reg.on_connection(&conn("adm", "active", Some("University Admin")));
        reg.on_connection(&conn("h-1", "active", Some("Alice")));
        reg.on_connection(&conn("h-1", "active", Some("Alice")));
        reg.on_connection(&conn("h-2", "request", Some("Bob")));

        assert_eq!(reg.holders.admin_connection(), Some("adm"));
        assert_eq!(reg.holders.all().len(), 1);
        assert_eq!(reg.holders.primary(), Some("h-1"));

        reg.on_connection(&conn("h-1", "abandoned", None));
        assert!(reg.holders.active_holders().is_empty());
        assert_eq!(
            reg.holders.get("h-1").unwrap().termination_reason.as_deref(),
            Some("connection_abandoned")
        );
        assert_eq!(reg.open_connections(), vec!["adm".to_string()]);
    }
}
