use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn access_upsert_converges_to_one_row_per_module() {
    let workspace = temp_dir("campusd-access-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "access.upsert",
        json!({ "principalId": "p1", "module": "attendance", "level": "view" }),
    );
    // Second upsert on the same (principal, module) must replace, not duplicate.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "access.upsert",
        json!({ "principalId": "p1", "module": "attendance", "level": "edit", "subDomain": "primary" }),
    );

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "access.get",
        json!({ "principalId": "p1" }),
    );
    let grants = got.get("grants").and_then(|v| v.as_object()).expect("grants map");
    assert_eq!(grants.len(), 1);
    let attendance = grants.get("attendance").expect("attendance grant");
    assert_eq!(
        attendance.get("level").and_then(|v| v.as_str()),
        Some("edit")
    );
    assert_eq!(
        attendance.get("subDomain").and_then(|v| v.as_str()),
        Some("primary")
    );
}

#[test]
fn access_remove_is_idempotent() {
    let workspace = temp_dir("campusd-access-remove");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "access.upsert",
        json!({ "principalId": "p1", "module": "fees", "level": "all" }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "access.remove",
        json!({ "principalId": "p1", "module": "fees" }),
    );
    assert_eq!(first.get("removed").and_then(|v| v.as_bool()), Some(true));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "access.remove",
        json!({ "principalId": "p1", "module": "fees" }),
    );
    assert_eq!(second.get("removed").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn access_replace_all_swaps_the_grant_set_and_empty_revokes_all() {
    let workspace = temp_dir("campusd-access-replace");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (i, module) in ["attendance", "fees", "exams"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("up{}", i),
            "access.upsert",
            json!({ "principalId": "p1", "module": module, "level": "view" }),
        );
    }

    let replaced = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "access.replaceAll",
        json!({
            "principalId": "p1",
            "grants": [
                { "module": "students", "level": "all" },
                { "module": "reports", "level": "view" }
            ]
        }),
    );
    assert_eq!(replaced.get("replaced").and_then(|v| v.as_u64()), Some(2));

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "access.get",
        json!({ "principalId": "p1" }),
    );
    let grants = got.get("grants").and_then(|v| v.as_object()).expect("grants map");
    assert_eq!(grants.len(), 2);
    assert!(grants.contains_key("students"));
    assert!(grants.contains_key("reports"));
    assert!(!grants.contains_key("attendance"));

    // Revoke-all is the same operation with an empty list.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "access.replaceAll",
        json!({ "principalId": "p1", "grants": [] }),
    );
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "access.get",
        json!({ "principalId": "p1" }),
    );
    let grants = got.get("grants").and_then(|v| v.as_object()).expect("grants map");
    assert!(grants.is_empty());
}

#[test]
fn access_replace_all_rejects_bad_levels_without_partial_effects() {
    let workspace = temp_dir("campusd-access-replace-bad");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "access.upsert",
        json!({ "principalId": "p1", "module": "fees", "level": "view" }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "access.replaceAll",
        json!({
            "principalId": "p1",
            "grants": [
                { "module": "students", "level": "all" },
                { "module": "reports", "level": "owner" }
            ]
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    // The prior grant set is untouched.
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "access.get",
        json!({ "principalId": "p1" }),
    );
    let grants = got.get("grants").and_then(|v| v.as_object()).expect("grants map");
    assert_eq!(grants.len(), 1);
    assert!(grants.contains_key("fees"));
}

#[test]
fn access_upsert_rejects_unknown_level() {
    let workspace = temp_dir("campusd-access-bad-level");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "access.upsert",
        json!({ "principalId": "p1", "module": "fees", "level": "root" }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );
}
