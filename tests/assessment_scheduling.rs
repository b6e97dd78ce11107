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
    let exe = env!("CARGO_BIN_EXE_shuled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn shuled");
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

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .expect("error code")
        .to_string()
}

fn setup(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    let _ = request_ok(
        stdin,
        reader,
        "setup-1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-2",
        "teachers.create",
        json!({
            "firstName": "Grace",
            "lastName": "Odhiambo",
            "username": "godhiambo",
            "email": "grace@school.test",
            "phone": "0711000001",
            "address": "Nakuru"
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-3",
        "classes.create",
        json!({ "name": "F1" }),
    );
    let stream = request_ok(
        stdin,
        reader,
        "setup-4",
        "streams.create",
        json!({ "className": "F1", "letter": "E" }),
    );
    assert_eq!(
        stream.get("displayName").and_then(|v| v.as_str()),
        Some("F1E")
    );
}

#[test]
fn cat_window_is_exactly_forty_minutes() {
    let workspace = temp_dir("shuled-cat-window");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    let cat = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "cats.create",
        json!({
            "teacherCode": "T-001",
            "subject": "Maths",
            "className": "F1",
            "streamLetter": "E",
            "title": "Algebra check",
            "term": 1,
            "startsAt": "2026-02-03T08:00:00Z",
            "endsAt": "2026-02-03T08:40:00Z"
        }),
    );
    assert_eq!(cat.get("code").and_then(|v| v.as_str()), Some("C-001"));
    assert_eq!(cat.get("durationMinutes").and_then(|v| v.as_i64()), Some(40));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "cats.create",
        json!({
            "teacherCode": "T-001",
            "subject": "Maths",
            "className": "F1",
            "streamLetter": "E",
            "title": "Too long",
            "term": 1,
            "startsAt": "2026-02-03T08:00:00Z",
            "endsAt": "2026-02-03T08:45:00Z"
        }),
    );
    assert_eq!(code, "validation");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "cats.create",
        json!({
            "teacherCode": "T-001",
            "subject": "Maths",
            "className": "F1",
            "streamLetter": "E",
            "title": "Backwards",
            "term": 1,
            "startsAt": "2026-02-03T08:40:00Z",
            "endsAt": "2026-02-03T08:00:00Z"
        }),
    );
    assert_eq!(code, "validation");

    // The failed attempts must not have consumed C-002.
    let cat2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "cats.create",
        json!({
            "teacherCode": "T-001",
            "subject": "English",
            "className": "F1",
            "streamLetter": "E",
            "title": "Comprehension",
            "term": 1,
            "startsAt": "2026-02-04T08:00:00Z",
            "endsAt": "2026-02-04T08:40:00Z"
        }),
    );
    assert_eq!(cat2.get("code").and_then(|v| v.as_str()), Some("C-002"));
}

#[test]
fn exam_window_is_at_least_two_hours() {
    let workspace = temp_dir("shuled-exam-window");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "exams.create",
        json!({
            "teacherCode": "T-001",
            "subject": "Maths",
            "className": "F1",
            "streamLetter": "E",
            "title": "Too short",
            "term": 1,
            "startsAt": "2026-03-10T08:00:00Z",
            "endsAt": "2026-03-10T09:30:00Z"
        }),
    );
    assert_eq!(code, "validation");

    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.create",
        json!({
            "teacherCode": "T-001",
            "subject": "Maths",
            "className": "F1",
            "streamLetter": "E",
            "title": "End of term",
            "term": 1,
            "startsAt": "2026-03-10T08:00:00Z",
            "endsAt": "2026-03-10T10:00:00Z"
        }),
    );
    assert_eq!(exam.get("code").and_then(|v| v.as_str()), Some("E-001"));
    assert_eq!(
        exam.get("durationMinutes").and_then(|v| v.as_i64()),
        Some(120)
    );

    // Longer than the minimum is fine.
    let exam2 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exams.create",
        json!({
            "teacherCode": "T-001",
            "subject": "Physics",
            "className": "F1",
            "streamLetter": "E",
            "title": "Practical",
            "term": 1,
            "startsAt": "2026-03-11T08:00:00Z",
            "endsAt": "2026-03-11T10:30:00Z"
        }),
    );
    assert_eq!(exam2.get("code").and_then(|v| v.as_str()), Some("E-002"));
}

#[test]
fn assessments_need_a_known_stream_and_valid_term() {
    let workspace = temp_dir("shuled-assessment-errors");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    // F1W was never created.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "cats.create",
        json!({
            "teacherCode": "T-001",
            "subject": "Maths",
            "className": "F1",
            "streamLetter": "W",
            "title": "Algebra check",
            "term": 1,
            "startsAt": "2026-02-03T08:00:00Z",
            "endsAt": "2026-02-03T08:40:00Z"
        }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "cats.create",
        json!({
            "teacherCode": "T-001",
            "subject": "Maths",
            "className": "F1",
            "streamLetter": "E",
            "title": "Algebra check",
            "term": 4,
            "startsAt": "2026-02-03T08:00:00Z",
            "endsAt": "2026-02-03T08:40:00Z"
        }),
    );
    assert_eq!(code, "validation");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "exams.create",
        json!({
            "teacherCode": "T-999",
            "subject": "Maths",
            "className": "F1",
            "streamLetter": "E",
            "title": "End of term",
            "term": 1,
            "startsAt": "2026-03-10T08:00:00Z",
            "endsAt": "2026-03-10T10:00:00Z"
        }),
    );
    assert_eq!(code, "not_found");
}
