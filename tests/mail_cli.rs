//! End-to-end mail flows through the binary, against a temp `.overstory/`.

use assert_cmd::Command;
use predicates::prelude::*;

fn overstory(repo_root: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("overstory").unwrap();
    cmd.current_dir(repo_root);
    cmd
}

fn send(repo_root: &std::path::Path, args: &[&str]) -> i64 {
    let output = overstory(repo_root)
        .args(["mail", "send", "--json"])
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send --json output");
    value["id"].as_i64().unwrap()
}

#[test]
fn send_then_list_shows_message() {
    let tmp = tempfile::tempdir().unwrap();
    send(
        tmp.path(),
        &["--to", "builder-1", "--subject", "Build", "--body", "impl X"],
    );

    overstory(tmp.path())
        .args(["mail", "list", "--to", "builder-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Build"))
        .stdout(predicate::str::contains("orchestrator -> builder-1"))
        .stdout(predicate::str::contains("unread"));
}

#[test]
fn read_twice_reports_already_read() {
    let tmp = tempfile::tempdir().unwrap();
    let id = send(
        tmp.path(),
        &["--to", "builder-1", "--subject", "s", "--body", "b"],
    );

    overstory(tmp.path())
        .args(["mail", "read", &id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("already read").not());

    overstory(tmp.path())
        .args(["mail", "read", &id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("already read"));
}

#[test]
fn reply_with_flags_before_id() {
    let tmp = tempfile::tempdir().unwrap();
    let id = send(
        tmp.path(),
        &[
            "--to",
            "builder-1",
            "--from",
            "orchestrator",
            "--subject",
            "Build",
            "--body",
            "impl X",
        ],
    );

    // Flags first, positional id last.
    overstory(tmp.path())
        .args([
            "mail",
            "reply",
            "--agent",
            "scout-1",
            "--body",
            "Got it",
            &id.to_string(),
        ])
        .assert()
        .success();

    let output = overstory(tmp.path())
        .args(["mail", "list", "--to", "orchestrator", "--json"])
        .output()
        .unwrap();
    let messages: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reply = &messages[0];
    assert_eq!(reply["from"], "scout-1");
    assert_eq!(reply["to"], "orchestrator");
    assert_eq!(reply["subject"], "Re: Build");
    assert_eq!(reply["body"], "Got it");
    assert_eq!(reply["in_reply_to"], id);
}

#[test]
fn urgent_send_queues_nudge_and_inject_drains_it_once() {
    let tmp = tempfile::tempdir().unwrap();
    send(
        tmp.path(),
        &[
            "--to",
            "builder-1",
            "--subject",
            "Fix NOW",
            "--body",
            "down",
            "--priority",
            "urgent",
        ],
    );

    let marker = tmp.path().join(".overstory/pending-nudges/builder-1.json");
    assert!(marker.exists(), "urgent send must write the nudge marker");
    let marker_json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&marker).unwrap()).unwrap();
    assert_eq!(marker_json["reason"], "urgent_priority");

    // First check: banner plus the message body; marker drained.
    overstory(tmp.path())
        .args(["mail", "check", "--inject", "--agent", "builder-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PRIORITY"))
        .stdout(predicate::str::contains("down"));
    assert!(!marker.exists());

    // Second check: no banner. The message itself stays unread until an
    // explicit `mail read`.
    overstory(tmp.path())
        .args(["mail", "check", "--inject", "--agent", "builder-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PRIORITY").not());
}

#[test]
fn check_without_pending_work_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    overstory(tmp.path())
        .args(["mail", "check", "--inject", "--agent", "nobody"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn check_without_inject_reports_count_only() {
    let tmp = tempfile::tempdir().unwrap();
    send(tmp.path(), &["--to", "impl", "--subject", "s", "--body", "b"]);

    let marker = tmp.path().join(".overstory/pending-nudges/impl.json");
    overstory(tmp.path())
        .args(["mail", "check", "--agent", "impl"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 unread message(s) for impl"));
    // No --inject: nothing is drained.
    assert!(!marker.exists());
}

#[test]
fn list_to_wins_over_agent() {
    let tmp = tempfile::tempdir().unwrap();
    send(tmp.path(), &["--to", "alpha", "--subject", "for alpha", "--body", "a"]);
    send(tmp.path(), &["--to", "beta", "--subject", "for beta", "--body", "b"]);

    overstory(tmp.path())
        .args(["mail", "list", "--to", "alpha", "--agent", "beta"])
        .assert()
        .success()
        .stdout(predicate::str::contains("for alpha"))
        .stdout(predicate::str::contains("for beta").not());
}

#[test]
fn list_unread_filter() {
    let tmp = tempfile::tempdir().unwrap();
    let id = send(tmp.path(), &["--to", "impl", "--subject", "old", "--body", "a"]);
    send(tmp.path(), &["--to", "impl", "--subject", "new", "--body", "b"]);

    overstory(tmp.path())
        .args(["mail", "read", &id.to_string()])
        .assert()
        .success();

    overstory(tmp.path())
        .args(["mail", "list", "--agent", "impl", "--unread"])
        .assert()
        .success()
        .stdout(predicate::str::contains("new"))
        .stdout(predicate::str::contains("old").not());
}

#[test]
fn worker_done_send_with_payload_feeds_merge_queue() {
    let tmp = tempfile::tempdir().unwrap();
    send(
        tmp.path(),
        &[
            "--to",
            "orchestrator",
            "--from",
            "impl",
            "--subject",
            "done",
            "--body",
            "finished",
            "--type",
            "worker_done",
            "--payload",
            r#"{"kind":"worker_done","branch":"overstory/impl/T1","task_id":"T1","files_modified":["src/a.ts"]}"#,
        ],
    );

    // worker_done queues a nudge for the orchestrator too.
    assert!(tmp
        .path()
        .join(".overstory/pending-nudges/orchestrator.json")
        .exists());

    overstory(tmp.path())
        .args(["merge", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("overstory/impl/T1"));
}

#[test]
fn invalid_payload_json_is_a_validation_error() {
    let tmp = tempfile::tempdir().unwrap();
    overstory(tmp.path())
        .args([
            "mail", "send", "--to", "x", "--subject", "s", "--body", "b", "--payload", "{nope",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --payload JSON"));
}

#[test]
fn status_runs_on_empty_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    overstory(tmp.path())
        .args(["status", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending-merges  count=0"));
}
