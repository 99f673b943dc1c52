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

fn seed_school_with_phones(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    count: usize,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(stdin, reader, "s2", "schools.create", json!({ "name": "Cap School" }));
    let school_id = school
        .get("schoolId")
        .and_then(|v| v.as_str())
        .expect("schoolId")
        .to_string();
    for i in 0..count {
        let _ = request_ok(
            stdin,
            reader,
            &format!("s3-{}", i),
            "students.add",
            json!({
                "schoolId": school_id,
                "firstName": format!("Kid{}", i),
                "lastName": "Nair",
                "parentPhone": format!("98765432{:02}", i)
            }),
        );
    }
    school_id
}

#[test]
fn weekly_dispatch_caps_sms_and_reports_the_dropped_count() {
    let workspace = temp_dir("campusd-weekly-cap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school_id = seed_school_with_phones(&mut stdin, &mut reader, &workspace, 3);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "notifications.dispatch",
        json!({
            "schoolId": school_id,
            "eventType": "weekly_report",
            "date": "2025-03-14",
            "smsCap": 2
        }),
    );
    assert_eq!(summary.get("totalAudience").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(summary.get("smsAttempted").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(summary.get("smsSent").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(summary.get("smsDropped").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(summary.get("date").and_then(|v| v.as_str()), Some("2025-03-14"));
}

#[test]
fn cap_of_zero_attempts_nothing_and_drops_everyone() {
    let workspace = temp_dir("campusd-weekly-cap-zero");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school_id = seed_school_with_phones(&mut stdin, &mut reader, &workspace, 2);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "notifications.dispatch",
        json!({
            "schoolId": school_id,
            "eventType": "weekly_report",
            "date": "2025-03-14",
            "smsCap": 0
        }),
    );
    assert_eq!(summary.get("smsAttempted").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(summary.get("smsDropped").and_then(|v| v.as_u64()), Some(2));
}

#[test]
fn unknown_event_type_falls_back_to_general() {
    let workspace = temp_dir("campusd-unknown-event");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school_id = seed_school_with_phones(&mut stdin, &mut reader, &workspace, 1);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "notifications.dispatch",
        json!({
            "schoolId": school_id,
            "eventType": "fee_reminder",
            "date": "2025-03-14"
        }),
    );
    assert_eq!(summary.get("eventType").and_then(|v| v.as_str()), Some("general"));
    assert_eq!(summary.get("smsSent").and_then(|v| v.as_u64()), Some(1));
}

#[test]
fn explicit_message_reaches_the_app_channel_verbatim() {
    let workspace = temp_dir("campusd-override-msg");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schools.create",
        json!({ "name": "Override School" }),
    );
    let school_id = school
        .get("schoolId")
        .and_then(|v| v.as_str())
        .expect("schoolId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.add",
        json!({
            "schoolId": school_id,
            "firstName": "Asha",
            "lastName": "Rao",
            "parentUserId": "parent-a"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notifications.dispatch",
        json!({
            "schoolId": school_id,
            "eventType": "emergency",
            "date": "2025-03-14",
            "title": "School closed",
            "message": "School closed tomorrow due to weather."
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "notifications.list",
        json!({ "userId": "parent-a" }),
    );
    let row = &listed
        .get("notifications")
        .and_then(|v| v.as_array())
        .expect("rows")[0];
    assert_eq!(row.get("title").and_then(|v| v.as_str()), Some("School closed"));
    assert_eq!(
        row.get("message").and_then(|v| v.as_str()),
        Some("School closed tomorrow due to weather.")
    );
    assert_eq!(row.get("priority").and_then(|v| v.as_str()), Some("urgent"));
}
