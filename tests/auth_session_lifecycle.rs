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
fn lecturer_gate_follows_login_and_logout() {
    let workspace = temp_dir("lmsd-auth-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let whoami = request(&mut stdin, &mut reader, "2", "auth.whoami", json!({}));
    assert_eq!(error_code(&whoami), "not_auth");

    let module_params = json!({
        "code": "SEC601",
        "name": "Gated Module",
        "creditHours": 3,
        "weights": { "attendance": 5, "assignments": 15, "test": 10, "finalExam": 70 }
    });
    let denied = request(
        &mut stdin,
        &mut reader,
        "3",
        "modules.create",
        module_params.clone(),
    );
    assert_eq!(error_code(&denied), "not_auth");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.create",
        json!({ "userNo": "S1", "lastName": "Gate", "firstName": "Student", "role": "student" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.create",
        json!({ "userNo": "L1", "lastName": "Gate", "firstName": "Lecturer", "role": "lecturer" }),
    );

    // A student session is a session, but not a lecturer one.
    let _ = request_ok(&mut stdin, &mut reader, "6", "auth.login", json!({ "userNo": "S1" }));
    let denied = request(
        &mut stdin,
        &mut reader,
        "7",
        "modules.create",
        module_params.clone(),
    );
    assert_eq!(error_code(&denied), "not_auth");

    let login = request_ok(&mut stdin, &mut reader, "8", "auth.login", json!({ "userNo": "L1" }));
    assert_eq!(login.get("role").and_then(|v| v.as_str()), Some("lecturer"));
    let token = login.get("token").and_then(|v| v.as_str()).expect("token");
    assert_eq!(token.len(), 64);

    let whoami = request_ok(&mut stdin, &mut reader, "9", "auth.whoami", json!({}));
    assert_eq!(
        whoami.get("displayName").and_then(|v| v.as_str()),
        Some("Gate, Lecturer")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "modules.create",
        module_params.clone(),
    );

    let logout = request_ok(&mut stdin, &mut reader, "11", "auth.logout", json!({}));
    assert_eq!(logout.get("loggedOut").and_then(|v| v.as_bool()), Some(true));
    let logout = request_ok(&mut stdin, &mut reader, "12", "auth.logout", json!({}));
    assert_eq!(logout.get("loggedOut").and_then(|v| v.as_bool()), Some(false));

    let whoami = request(&mut stdin, &mut reader, "13", "auth.whoami", json!({}));
    assert_eq!(error_code(&whoami), "not_auth");
    let denied = request(
        &mut stdin,
        &mut reader,
        "14",
        "modules.create",
        json!({
            "code": "SEC602",
            "name": "Gated Module Two",
            "creditHours": 3,
            "weights": { "attendance": 5, "assignments": 15, "test": 10, "finalExam": 70 }
        }),
    );
    assert_eq!(error_code(&denied), "not_auth");

    // Logging in as someone who was deactivated is refused.
    let _ = request_ok(&mut stdin, &mut reader, "15", "auth.login", json!({ "userNo": "L1" }));
    let listed = request_ok(&mut stdin, &mut reader, "16", "users.list", json!({ "role": "student" }));
    let student_id = listed
        .get("users")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "users.update",
        json!({ "userId": student_id, "patch": { "active": false } }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "18", "auth.logout", json!({}));
    let inactive = request(&mut stdin, &mut reader, "19", "auth.login", json!({ "userNo": "S1" }));
    assert_eq!(error_code(&inactive), "not_auth");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
