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
    let exe = env!("CARGO_BIN_EXE_lmsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lmsd");
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
    let payload = json!({ "id": id, "method": method, "params": params });
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
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[test]
fn final_grade_recomputes_from_components_on_every_read() {
    let workspace = temp_dir("lmsd-grade-sheet");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

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
        "users.create",
        json!({ "userNo": "L1", "lastName": "Grades", "firstName": "Lecturer", "role": "lecturer" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "3", "auth.login", json!({ "userNo": "L1" }));

    let module = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "modules.create",
        json!({
            "code": "GRD301",
            "name": "Grading",
            "creditHours": 3,
            "weights": { "attendance": 5, "assignments": 15, "test": 10, "finalExam": 70 }
        }),
    );
    let module_id = module
        .get("moduleId")
        .and_then(|v| v.as_str())
        .expect("moduleId")
        .to_string();

    let ace = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.create",
        json!({ "userNo": "S1", "lastName": "Ace", "firstName": "Student", "role": "student" }),
    );
    let ace_id = ace.get("userId").and_then(|v| v.as_str()).expect("userId").to_string();
    let idle = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "users.create",
        json!({ "userNo": "S2", "lastName": "Idle", "firstName": "Student", "role": "student" }),
    );
    let idle_id = idle.get("userId").and_then(|v| v.as_str()).expect("userId").to_string();
    for (i, sid) in [&ace_id, &idle_id].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("7-{}", i),
            "modules.enroll",
            json!({ "moduleId": module_id, "studentId": sid }),
        );
    }

    // One session, attended in full, so the attendance component is maxed.
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "sessions.create",
        json!({ "moduleId": module_id, "date": "2026-03-09" }),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_str())
        .expect("sessionId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "sessions.activate",
        json!({ "sessionId": session_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": ace_id, "status": "present" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "sessions.complete",
        json!({ "sessionId": session_id }),
    );

    // Component points above the component's weight are refused outright.
    let over = request(
        &mut stdin,
        &mut reader,
        "12",
        "grades.setComponent",
        json!({ "moduleId": module_id, "studentId": ace_id, "component": "test", "points": 11 }),
    );
    assert_eq!(error_code(&over), "bad_params");
    let stranger = request(
        &mut stdin,
        &mut reader,
        "13",
        "grades.setComponent",
        json!({ "moduleId": module_id, "studentId": "no-such-student", "component": "test", "points": 5 }),
    );
    assert_eq!(error_code(&stranger), "not_enrolled");

    for (i, (component, points)) in
        [("assignment", 15.0), ("test", 10.0), ("exam", 70.0)].iter().enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("14-{}", i),
            "grades.setComponent",
            json!({ "moduleId": module_id, "studentId": ace_id, "component": component, "points": points }),
        );
    }

    // Maxed components plus full attendance land exactly on 100 / A / 4.0.
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "grades.studentSummary",
        json!({ "moduleId": module_id, "studentId": ace_id }),
    );
    assert_eq!(summary.get("finalGrade").and_then(|v| v.as_f64()), Some(100.0));
    assert_eq!(summary.get("letter").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(summary.get("gradePoints").and_then(|v| v.as_f64()), Some(4.0));
    assert_eq!(summary.get("clamped").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        summary
            .get("attendance")
            .and_then(|a| a.get("score"))
            .and_then(|v| v.as_f64()),
        Some(5.0)
    );

    // Lowering a component lowers the recomputed grade, no stale stored value.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "grades.setComponent",
        json!({ "moduleId": module_id, "studentId": ace_id, "component": "exam", "points": 35 }),
    );
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "grades.studentSummary",
        json!({ "moduleId": module_id, "studentId": ace_id }),
    );
    assert_eq!(summary.get("finalGrade").and_then(|v| v.as_f64()), Some(65.0));
    assert_eq!(summary.get("letter").and_then(|v| v.as_str()), Some("B+"));
    assert_eq!(summary.get("gradePoints").and_then(|v| v.as_f64()), Some(3.75));

    let sheet = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "grades.sheet",
        json!({ "moduleId": module_id }),
    );
    let rows = sheet.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 2);

    let ace_row = rows
        .iter()
        .find(|r| r.get("userNo").and_then(|v| v.as_str()) == Some("S1"))
        .expect("ace row");
    assert_eq!(ace_row.get("finalGrade").and_then(|v| v.as_f64()), Some(65.0));
    assert_eq!(ace_row.get("graded").and_then(|v| v.as_bool()), Some(true));

    // The never-graded, never-marked student shows an empty standing, not zeros
    // dressed up as an F.
    let idle_row = rows
        .iter()
        .find(|r| r.get("userNo").and_then(|v| v.as_str()) == Some("S2"))
        .expect("idle row");
    assert!(idle_row.get("finalGrade").map(|v| v.is_null()).unwrap_or(false));
    assert!(idle_row.get("letter").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(idle_row.get("graded").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        idle_row
            .get("attendance")
            .and_then(|a| a.get("total"))
            .and_then(|v| v.as_u64()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
