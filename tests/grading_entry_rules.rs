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

/// Teacher T-001, parent P-001, student S-001 enrolled in F1 taking Maths and
/// English, with a Maths CAT C-001 and a Chemistry CAT C-002 on the books.
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
        "parents.create",
        json!({
            "firstName": "Mary",
            "lastName": "Wanjiru",
            "username": "mwanjiru",
            "email": "parent@home.test",
            "phone": "0722000001",
            "address": "Naivasha"
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-4",
        "students.create",
        json!({
            "firstName": "Brian",
            "lastName": "Wanjiru",
            "username": "bwanjiru",
            "email": "brian@school.test",
            "parentCode": "P-001",
            "parentEmail": "parent@home.test"
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-5",
        "classes.create",
        json!({ "name": "F1" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-6",
        "streams.create",
        json!({ "className": "F1", "letter": "E" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-7",
        "enrollment.assign",
        json!({
            "teacherCode": "T-001",
            "studentCode": "S-001",
            "className": "F1",
            "subjects": ["Maths", "English"]
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-8",
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
    let _ = request_ok(
        stdin,
        reader,
        "setup-9",
        "cats.create",
        json!({
            "teacherCode": "T-001",
            "subject": "Chemistry",
            "className": "F1",
            "streamLetter": "E",
            "title": "Titration",
            "term": 1,
            "startsAt": "2026-02-04T08:00:00Z",
            "endsAt": "2026-02-04T08:40:00Z"
        }),
    );
}

#[test]
fn cat_marks_are_bounded_and_graded_at_entry() {
    let workspace = temp_dir("shuled-grading-bounds");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "grading.cat",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "C-001",
            "studentCode": "S-001",
            "subject": "Maths",
            "marks": 0
        }),
    );
    assert_eq!(code, "validation");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "grading.cat",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "C-001",
            "studentCode": "S-001",
            "subject": "Maths",
            "marks": 41
        }),
    );
    assert_eq!(code, "validation");

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grading.cat",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "C-001",
            "studentCode": "S-001",
            "subject": "Maths",
            "marks": 34
        }),
    );
    assert_eq!(graded.get("grade").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(graded.get("term").and_then(|v| v.as_i64()), Some(1));

    // One grading per (assessment, student).
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "grading.cat",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "C-001",
            "studentCode": "S-001",
            "subject": "Maths",
            "marks": 20
        }),
    );
    assert_eq!(code, "conflict");
}

#[test]
fn grading_checks_subject_and_enrollment() {
    let workspace = temp_dir("shuled-grading-subject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    // C-001 covers Maths, not English.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "grading.cat",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "C-001",
            "studentCode": "S-001",
            "subject": "English",
            "marks": 20
        }),
    );
    assert_eq!(code, "validation");

    // S-001 takes Maths and English, not Chemistry.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "grading.cat",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "C-002",
            "studentCode": "S-001",
            "subject": "Chemistry",
            "marks": 20
        }),
    );
    assert_eq!(code, "validation");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "grading.cat",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "C-404",
            "studentCode": "S-001",
            "subject": "Maths",
            "marks": 20
        }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "grading.cat",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "C-001",
            "studentCode": "S-404",
            "subject": "Maths",
            "marks": 20
        }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn exam_marks_follow_their_own_bounds() {
    let workspace = temp_dir("shuled-grading-exam");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    setup(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
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

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "grading.exam",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "E-001",
            "studentCode": "S-001",
            "subject": "Maths",
            "marks": 61
        }),
    );
    assert_eq!(code, "validation");

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grading.exam",
        json!({
            "teacherCode": "T-001",
            "assessmentCode": "E-001",
            "studentCode": "S-001",
            "subject": "Maths",
            "marks": 60
        }),
    );
    assert_eq!(graded.get("grade").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(graded.get("marks").and_then(|v| v.as_i64()), Some(60));
}
