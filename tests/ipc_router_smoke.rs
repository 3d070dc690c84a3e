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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn result_str(value: &serde_json::Value, key: &str) -> String {
    value
        .get("result")
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing result.{} in {}", key, value))
        .to_string()
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("lmsd-router-smoke");
    let bundle_out = workspace.join("smoke-backup.lmsbackup.zip");
    let csv_out = workspace.join("smoke-grades.csv");
    let roster_csv = workspace.join("smoke-roster.csv");
    std::fs::write(
        &roster_csv,
        "user_no,last_name,first_name,email,role\nS100,Imported,Student,s100@example.edu,student\n",
    )
    .expect("write roster csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let lecturer = request(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({ "userNo": "L1", "lastName": "Smoke", "firstName": "Lecturer", "role": "lecturer" }),
    );
    let _lecturer_id = result_str(&lecturer, "userId");
    let _ = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "userNo": "L1" }),
    );
    let _ = request(&mut stdin, &mut reader, "5", "auth.whoami", json!({}));

    let student = request(
        &mut stdin,
        &mut reader,
        "6",
        "users.create",
        json!({ "userNo": "S1", "lastName": "Smoke", "firstName": "Student", "role": "student" }),
    );
    let student_id = result_str(&student, "userId");
    let _ = request(&mut stdin, &mut reader, "7", "users.list", json!({ "role": "student" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "users.update",
        json!({ "userId": student_id, "patch": { "firstName": "Updated" } }),
    );
    let import = request(
        &mut stdin,
        &mut reader,
        "9",
        "users.importCsv",
        json!({ "csvPath": roster_csv.to_string_lossy() }),
    );
    assert_eq!(
        import
            .get("result")
            .and_then(|v| v.get("inserted"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );

    let module = request(
        &mut stdin,
        &mut reader,
        "10",
        "modules.create",
        json!({
            "code": "SMK101",
            "name": "Smoke Module",
            "creditHours": 3,
            "weights": { "attendance": 5, "assignments": 15, "test": 10, "finalExam": 70 }
        }),
    );
    let module_id = result_str(&module, "moduleId");
    let _ = request(&mut stdin, &mut reader, "11", "modules.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "modules.enroll",
        json!({ "moduleId": module_id, "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "modules.roster",
        json!({ "moduleId": module_id }),
    );

    let session = request(
        &mut stdin,
        &mut reader,
        "14",
        "sessions.create",
        json!({ "moduleId": module_id, "date": "2026-02-02" }),
    );
    let session_id = result_str(&session, "sessionId");
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "sessions.list",
        json!({ "moduleId": module_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "sessions.activate",
        json!({ "sessionId": session_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": student_id, "status": "present" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "attendance.sessionOpen",
        json!({ "sessionId": session_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "attendance.summary",
        json!({ "moduleId": module_id, "studentId": student_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "grades.setComponent",
        json!({ "moduleId": module_id, "studentId": student_id, "component": "exam", "points": 55 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "grades.studentSummary",
        json!({ "moduleId": module_id, "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "22",
        "grades.sheet",
        json!({ "moduleId": module_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "23",
        "transcript.open",
        json!({ "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "24",
        "reports.moduleGradeCsv",
        json!({ "moduleId": module_id, "outPath": csv_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "25",
        "backup.exportWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "outPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "26",
        "backup.importWorkspaceBundle",
        json!({
            "workspacePath": workspace.to_string_lossy(),
            "inPath": bundle_out.to_string_lossy()
        }),
    );
    let _ = request(&mut stdin, &mut reader, "27", "auth.logout", json!({}));

    // Unknown methods still fall through to the router's terminal error.
    let payload = json!({ "id": "28", "method": "nope.method", "params": {} });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
