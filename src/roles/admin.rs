//! Admin: receives approval requests from the registrar and answers them.

use async_trait::async_trait;

use super::registrar::print_invitation;
use super::{fmt_time, Flow, RoleHandler, Session};
use crate::console::Console;
use crate::errors::{AppError, AppResult};
use crate::models::approval::{ApprovalRecord, ApprovalStatus};
use crate::models::envelope::{Envelope, Inbound};
use crate::models::event::{AgentEvent, BasicMessageEvent, ConnectionEvent};
use crate::store::approvals::ApprovalTracker;
use crate::watch::ConnectionState;

pub struct Admin {
    session: Session,
    approvals: ApprovalTracker,
    /// First connection to become active; later ones are logged only.
    registrar_connection: Option<String>,
}

impl Admin {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            approvals: ApprovalTracker::new(),
            registrar_connection: None,
        }
    }

    pub fn approvals(&self) -> &ApprovalTracker {
        &self.approvals
    }

    pub fn registrar_connection(&self) -> Option<&str> {
        self.registrar_connection.as_deref()
    }

    pub fn on_connection(&mut self, ev: &ConnectionEvent) {
        let id = ev.connection_id.as_str();
        match self.session.watch.observe(id, ev.connection_state()) {
            ConnectionState::Active => match self.registrar_connection.as_deref() {
                None => {
                    println!("Registrar connected: {}", id);
                    self.registrar_connection = Some(id.to_string());
                }
                Some(current) if current != id => {
                    tracing::info!(
                        connection_id = id,
                        registrar = current,
                        "additional connection active, keeping the first as registrar"
                    );
                }
                Some(_) => {}
            },
            ConnectionState::Terminated => {
                if self.registrar_connection.as_deref() == Some(id) {
                    tracing::info!(connection_id = id, state = %ev.state, "registrar connection closed");
                    self.registrar_connection = None;
                }
            }
            ConnectionState::Pending => {}
        }
    }

    pub fn on_basic_message(&mut self, ev: &BasicMessageEvent) {
        let from = ev.connection_id.as_deref().unwrap_or("unknown");
        match Envelope::decode(&ev.content) {
            Err(e) => tracing::warn!(connection_id = from, "dropping malformed approval message: {}", e),
            Ok(Inbound::Text(text)) => println!("Message from {}: {}", from, text),
            Ok(Inbound::Envelope(Envelope::ApprovalRequest(req))) => {
                let name = req
                    .student_data
                    .get("student_name")
                    .cloned()
                    .unwrap_or_else(|| "N/A".into());
                if self
                    .approvals
                    .track(&req.approval_id, req.student_data, ev.connection_id.clone())
                {
                    println!(
                        "New approval request {} for {}. Use option 1 or 2 to respond.",
                        req.approval_id, name
                    );
                }
            }
            Ok(Inbound::Envelope(Envelope::ApprovalResponse(resp))) => {
                tracing::info!(approval_id = %resp.approval_id, "admin does not consume approval responses, ignoring");
            }
        }
    }

    /// Answer a pending request over the connection it arrived on.
    ///
    /// The record is resolved and removed only after the response was sent,
    /// so a failed send leaves it pending for another attempt.
    pub async fn respond(
        &mut self,
        approval_id: &str,
        approved: bool,
        comments: &str,
    ) -> AppResult<ApprovalRecord> {
        let record = self
            .approvals
            .get(approval_id)
            .ok_or_else(|| AppError::not_found("approval", approval_id))?;
        if record.status != ApprovalStatus::Pending {
            return Err(AppError::InvalidUserInput(format!(
                "approval {} is already {}",
                approval_id, record.status
            )));
        }
        let conn = record
            .origin_connection_id
            .clone()
            .or_else(|| self.registrar_connection.clone())
            .ok_or_else(|| AppError::InvalidUserInput("no registrar connection".into()))?;

        self.session
            .client
            .await_active(&self.session.watch, &conn, self.session.cfg.connect_timeout())
            .await?;
        let content =
            Envelope::response(approval_id, approved, comments, &self.session.cfg.party_id)
                .encode()?;
        self.session.client.send_message(&conn, &content).await?;

        self.approvals.record_response(approval_id, approved, comments)?;
        self.approvals.consume(approval_id)
    }

    async fn cmd_respond(&mut self, console: &mut Console, approved: bool) -> AppResult<()> {
        let pending: Vec<(String, String)> = self
            .approvals
            .list_pending()
            .into_iter()
            .map(|r| {
                (
                    r.approval_id.clone(),
                    format!(
                        "{}  Student: {}  ID: {}",
                        r.approval_id,
                        r.attr("student_name"),
                        r.attr("student_id")
                    ),
                )
            })
            .collect();
        if pending.is_empty() {
            println!("No pending approval requests.");
            return Ok(());
        }

        let labels: Vec<String> = pending.iter().map(|(_, l)| l.clone()).collect();
        let i = console.choose("PENDING APPROVAL REQUESTS", &labels).await?;
        let comments = if approved {
            console.prompt("Enter approval comments (optional): ").await?
        } else {
            console.prompt("Enter rejection reason: ").await?
        };

        let record = self.respond(&pending[i].0, approved, &comments).await?;
        println!(
            "Approval response sent - {} for approval ID: {}",
            if approved { "APPROVED" } else { "REJECTED" },
            record.approval_id
        );
        Ok(())
    }

    fn print_pending(&self) {
        let pending = self.approvals.list_pending();
        if pending.is_empty() {
            println!("No pending approval requests.");
            return;
        }
        println!("\n=== PENDING APPROVAL REQUESTS ===");
        for r in pending {
            println!("\nApproval ID: {}", r.approval_id);
            println!("Request Time: {}", fmt_time(&r.created_at));
            for (name, value) in &r.subject_data {
                println!("{}: {}", name, value);
            }
        }
    }

    async fn cmd_message(&mut self, console: &mut Console) -> AppResult<()> {
        let Some(conn) = self.registrar_connection.clone() else {
            println!("No connection to registrar established.");
            return Ok(());
        };
        let msg = console.prompt("Enter message to registrar: ").await?;
        self.session.client.send_message(&conn, &msg).await?;
        println!("Message sent");
        Ok(())
    }

    async fn cmd_create_invitation(&mut self) -> AppResult<()> {
        let alias = format!("{} admin", self.session.cfg.party_id);
        let invitation = self.session.client.create_invitation(&alias).await?;
        print_invitation(&invitation);
        println!("Admin agent ready to receive connection from registrar");
        Ok(())
    }
}

#[async_trait]
impl RoleHandler for Admin {
    fn name(&self) -> &'static str {
        "admin"
    }

    fn print_menu(&self) {
        println!(
            "\n    (1) Approve Pending Credential Request\n\
             \x20   (2) Reject Pending Credential Request\n\
             \x20   (3) List Pending Approval Requests\n\
             \x20   (4) Send Message to Registrar\n\
             \x20   (5) Create New Invitation\n\
             \x20   (X) Exit?\n"
        );
    }

    async fn on_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Connection(ev) => self.on_connection(&ev),
            AgentEvent::BasicMessage(ev) => self.on_basic_message(&ev),
            other => tracing::debug!(?other, "admin ignores event"),
        }
    }

    async fn on_command(&mut self, command: &str, console: &mut Console) -> AppResult<Flow> {
        match command.to_lowercase().as_str() {
            "1" => self.cmd_respond(console, true).await?,
            "2" => self.cmd_respond(console, false).await?,
            "3" => self.print_pending(),
            "4" => self.cmd_message(console).await?,
            "5" => self.cmd_create_invitation().await?,
            "x" => return Ok(Flow::Exit),
            other => {
                return Err(AppError::InvalidUserInput(format!("unknown option '{}'", other)))
            }
        }
        Ok(Flow::Continue)
    }

    fn open_connections(&self) -> Vec<String> {
        self.registrar_connection.iter().cloned().collect()
    }

    fn session(&self) -> &Session {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AdminClient;
    use crate::config::Config;
    use crate::models::approval::SubjectData;
    use crate::watch::ConnectionWatch;

    fn admin() -> Admin {
        let cfg = Config::default();
        Admin::new(Session {
            client: AdminClient::new(&cfg).unwrap(),
            watch: ConnectionWatch::new(),
            cfg,
        })
    }

    fn active(id: &str) -> ConnectionEvent {
        ConnectionEvent {
            connection_id: id.into(),
            state: "active".into(),
            rfc23_state: None,
            their_label: None,
            alias: None,
        }
    }

    #[test]
    fn test_first_active_connection_is_registrar() {
        let mut admin = admin();
        admin.on_connection(&active("c-1"));
        admin.on_connection(&active("c-2"));
        assert_eq!(admin.registrar_connection(), Some("c-1"));
        assert_eq!(admin.open_connections(), vec!["c-1".to_string()]);
    }

    #[test]
    fn test_request_tracked_once_with_origin() {
        let mut admin = admin();
        let mut data = SubjectData::new();
        data.insert("student_name".into(), "Jane Doe".into());
        let content = Envelope::request("appr-1", data, "REG001").encode().unwrap();
        let ev = BasicMessageEvent {
            connection_id: Some("c-9".into()),
            message_id: None,
            content,
        };

        admin.on_basic_message(&ev);
        admin.on_basic_message(&ev);

        assert_eq!(admin.approvals().len(), 1);
        let record = admin.approvals().get("appr-1").unwrap();
        assert_eq!(record.origin_connection_id.as_deref(), Some("c-9"));
        assert_eq!(record.attr("student_name"), "Jane Doe");
    }

    #[tokio::test]
    async fn test_respond_unknown_is_not_found() {
        let mut admin = admin();
        let err = admin.respond("nope", true, "").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }
}
