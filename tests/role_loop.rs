//! The role loop: operator commands, exit and connection teardown.

use serde_json::json;
use tokio::sync::mpsc;
use unicred::agent::AdminClient;
use unicred::config::Config;
use unicred::console::Console;
use unicred::errors::AppError;
use unicred::models::event::{AgentEvent, ConnectionEvent};
use unicred::roles::{self, Registrar, RoleHandler, Session, Verifier};
use unicred::watch::ConnectionWatch;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session(server: &MockServer) -> Session {
    let cfg = Config {
        admin_url: server.uri(),
        ..Config::default()
    };
    Session {
        client: AdminClient::new(&cfg).unwrap(),
        watch: ConnectionWatch::new(),
        cfg,
    }
}

fn active(id: &str, label: &str) -> AgentEvent {
    AgentEvent::Connection(ConnectionEvent {
        connection_id: id.into(),
        state: "active".into(),
        rfc23_state: None,
        their_label: Some(label.into()),
        alias: None,
    })
}

fn delete_ok(id: &str, status: u16) -> Mock {
    Mock::given(method("DELETE"))
        .and(path(format!("/connections/{}", id)))
        .respond_with(ResponseTemplate::new(status))
        .expect(1)
}

#[tokio::test]
async fn test_commands_then_exit_closes_connections() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/present-proof-2.0/send-request"))
        .and(body_partial_json(json!({"connection_id": "c-2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pres_ex_id": "p-1"})))
        .expect(1)
        .mount(&server)
        .await;
    delete_ok("c-1", 200).mount(&server).await;
    // already gone on the agent side: still counts as closed
    delete_ok("c-2", 404).mount(&server).await;

    let mut verifier = Verifier::new(session(&server));
    verifier.on_event(active("c-1", "Alice")).await;
    verifier.on_event(active("c-2", "Bob")).await;

    // an unknown option is reported and the loop keeps going
    let console = Console::new(&b"bogus\n1\n2\nx\n"[..]);
    let (_tx, rx) = mpsc::channel(8);

    roles::run(verifier, console, rx).await.unwrap();
}

#[tokio::test]
async fn test_teardown_failure_is_an_error() {
    let server = MockServer::start().await;

    delete_ok("holder-1", 200).mount(&server).await;
    delete_ok("adm-1", 500).mount(&server).await;

    let mut registrar = Registrar::new(session(&server));
    registrar.on_event(active("holder-1", "Alice")).await;
    registrar.on_event(active("adm-1", "University Admin")).await;

    // input closes without an explicit exit
    let (_tx, rx) = mpsc::channel(8);
    let err = roles::run(registrar, Console::new(&b""[..]), rx)
        .await
        .unwrap_err();

    match err {
        AppError::Unreachable(msg) => {
            assert!(msg.contains("adm-1"));
            assert!(!msg.contains("holder-1"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_events_are_handled_while_waiting_for_input() {
    let server = MockServer::start().await;
    delete_ok("c-7", 200).mount(&server).await;

    let (tx, rx) = mpsc::channel(8);
    let (mut writer, reader) = tokio::io::duplex(64);

    let loop_task = tokio::spawn(roles::run(
        Verifier::new(session(&server)),
        Console::new(reader),
        rx,
    ));

    tx.send(active("c-7", "Carol")).await.unwrap();
    // give the loop a chance to take the event before exiting
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    tokio::io::AsyncWriteExt::write_all(&mut writer, b"x\n")
        .await
        .unwrap();

    loop_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_teardown_of_nothing_makes_no_calls() {
    let server = MockServer::start().await;
    let client = AdminClient::new(&Config {
        admin_url: server.uri(),
        ..Config::default()
    })
    .unwrap();

    roles::teardown(&client, &[]).await.unwrap();
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupt_still_closes_connections() {
    let server = MockServer::start().await;
    delete_ok("c-3", 200).mount(&server).await;

    let mut verifier = Verifier::new(session(&server));
    verifier.on_event(active("c-3", "Dave")).await;

    // the operator never types anything
    let (_writer, reader) = tokio::io::duplex(64);
    let (_tx, rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let loop_task = tokio::spawn(roles::run_until(
        verifier,
        Console::new(reader),
        rx,
        async {
            let _ = stop_rx.await;
        },
    ));

    stop_tx.send(()).unwrap();
    loop_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_generic_request_defaults_from_menu() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/present-proof-2.0/send-request"))
        .and(body_partial_json(json!({
            "connection_id": "c-5",
            "presentation_request": {"indy": {"requested_attributes": {
                "0_student_name_uuid": {"name": "student_name"},
                "0_university_name_uuid": {"name": "university_name"},
                "0_graduation_year_uuid": {"name": "graduation_year"},
            }}},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pres_ex_id": "p-5"})))
        .expect(1)
        .mount(&server)
        .await;
    delete_ok("c-5", 200).mount(&server).await;

    let mut verifier = Verifier::new(session(&server));
    verifier.on_event(active("c-5", "Erin")).await;

    // option 2, then Enter for the schema and for the attributes
    let console = Console::new(&b"2\n\n\nx\n"[..]);
    let (_tx, rx) = mpsc::channel(8);
    roles::run(verifier, console, rx).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let requested = &sent["presentation_request"]["indy"]["requested_attributes"];
    assert!(requested.get("0_student_id_uuid").is_none());
}
