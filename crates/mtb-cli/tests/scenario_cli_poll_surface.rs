//! HTTP subcommands against a stand-in daemon.
//!
//! GREEN when:
//! - `--token` is sent as `Authorization: Bearer` and replies are printed
//!   as key=value lines.
//! - `take` on an empty queue prints `empty=true`.
//! - A 401 from the daemon makes the CLI exit non-zero naming the status.

use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::prelude::*;

fn mtb(server: &MockServer) -> Command {
    let mut cmd = Command::cargo_bin("mtb").unwrap();
    cmd.env_remove("MTB_AUTH_TOKEN")
        .env_remove("MTB_BASE_URL")
        .args(["--base-url", &server.url("/v1")]);
    cmd
}

#[test]
fn pending_sends_bearer_token() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/poll/pending")
            .header("authorization", "Bearer T");
        then.status(200)
            .json_body(serde_json::json!({ "pending": true, "pending_count": 2 }));
    });

    mtb(&server)
        .args(["--token", "T", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending=true pending_count=2"));
    m.assert();
}

#[test]
fn take_on_empty_queue() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/poll/take");
        then.status(204);
    });

    mtb(&server)
        .arg("take")
        .assert()
        .success()
        .stdout(predicate::str::contains("empty=true"));
}

#[test]
fn respond_posts_command_and_response() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/poll/response")
            .json_body(serde_json::json!({ "command": "order.buy", "response": "ticket=7" }));
        then.status(200)
            .json_body(serde_json::json!({ "resolved": false, "command_id": null }));
    });

    mtb(&server)
        .args(["respond", "order.buy", "ticket=7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("resolved=false"));
    m.assert();
}

#[test]
fn unauthorized_is_reported() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/poll/event");
        then.status(401).json_body(serde_json::json!({
            "error": "UNAUTHORIZED: missing or invalid auth token",
            "kind": "unauthorized"
        }));
    });

    mtb(&server)
        .args(["raise-event", "tick"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("http 401"))
        .stderr(predicate::str::contains("UNAUTHORIZED"));
}
