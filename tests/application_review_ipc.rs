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
    let exe = env!("CARGO_BIN_EXE_feeledgerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn feeledgerd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn roundtrip(
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
    let value = roundtrip(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = roundtrip(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded",
        method
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn submit_application(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "applications.submit",
        json!({
            "applicantName": name,
            "email": format!("{}@applicants.test", name.to_lowercase().replace(' ', ".")),
            "course": "BTech CSE"
        }),
    );
    assert_eq!(result.get("status").and_then(|v| v.as_str()), Some("pending"));
    result
        .get("applicationId")
        .and_then(|v| v.as_str())
        .expect("applicationId")
        .to_string()
}

#[test]
fn review_flow_keeps_a_full_audit_trail() {
    let workspace = temp_dir("feeledger-applications-review");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let application_id = submit_application(&mut stdin, &mut reader, "2", "Anil Kumar");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "applications.updateStatus",
        json!({
            "applicationId": application_id,
            "status": "under_review",
            "reason": "documents received",
            "changedBy": "officer@college.test"
        }),
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "applications.updateStatus",
        json!({
            "applicationId": application_id,
            "status": "approved",
            "admissionNumber": "2025CSE042",
            "reason": "merit list",
            "changedBy": "officer@college.test"
        }),
    );
    assert_eq!(
        updated.get("fromStatus").and_then(|v| v.as_str()),
        Some("under_review")
    );
    assert_eq!(updated.get("toStatus").and_then(|v| v.as_str()), Some("approved"));

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "applications.get",
        json!({ "applicationId": application_id }),
    );
    let application = got.get("application").expect("application");
    assert_eq!(
        application.get("status").and_then(|v| v.as_str()),
        Some("approved")
    );
    assert_eq!(
        application.get("admissionNumber").and_then(|v| v.as_str()),
        Some("2025CSE042")
    );

    let log = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "applications.statusLog",
        json!({ "applicationId": application_id }),
    );
    let entries = log
        .get("statusLog")
        .and_then(|v| v.as_array())
        .expect("statusLog");
    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries[0].get("toStatus").and_then(|v| v.as_str()),
        Some("under_review")
    );
    assert_eq!(
        entries[1].get("fromStatus").and_then(|v| v.as_str()),
        Some("under_review")
    );
    assert_eq!(
        entries[1].get("reason").and_then(|v| v.as_str()),
        Some("merit list")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn approved_applications_are_locked() {
    let workspace = temp_dir("feeledger-applications-locked");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let application_id = submit_application(&mut stdin, &mut reader, "2", "Divya Shetty");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "applications.updateStatus",
        json!({
            "applicationId": application_id,
            "status": "approved",
            "admissionNumber": "2025CSE043"
        }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "applications.updateStatus",
        json!({ "applicationId": application_id, "status": "rejected" }),
    );
    assert_eq!(code, "application_locked");

    // The lock also means the rejected attempt never reaches the log.
    let log = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "applications.statusLog",
        json!({ "applicationId": application_id }),
    );
    assert_eq!(
        log.get("statusLog").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn approval_requires_an_admission_number() {
    let workspace = temp_dir("feeledger-applications-admission-number");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let application_id = submit_application(&mut stdin, &mut reader, "2", "Faisal Khan");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "applications.updateStatus",
        json!({ "applicationId": application_id, "status": "approved" }),
    );
    assert_eq!(code, "bad_params");

    // Still pending; non-approval transitions need no admission number.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "applications.updateStatus",
        json!({ "applicationId": application_id, "status": "waitlisted" }),
    );
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "applications.get",
        json!({ "applicationId": application_id }),
    );
    assert_eq!(
        got.get("application")
            .and_then(|a| a.get("status"))
            .and_then(|v| v.as_str()),
        Some("waitlisted")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn list_filters_by_status_and_search() {
    let workspace = temp_dir("feeledger-applications-list");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = submit_application(&mut stdin, &mut reader, "2", "Gita Iyer");
    let _ = submit_application(&mut stdin, &mut reader, "3", "Hari Das");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "applications.updateStatus",
        json!({ "applicationId": first, "status": "under_review" }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "applications.list",
        json!({ "status": "pending" }),
    );
    let rows = listed
        .get("applications")
        .and_then(|v| v.as_array())
        .expect("applications");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("applicantName").and_then(|v| v.as_str()),
        Some("Hari Das")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "applications.list",
        json!({ "search": "Gita" }),
    );
    assert_eq!(
        listed
            .get("applications")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
}
