use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_lecturer, required_str};
use crate::ipc::types::{AppState, Request};
use crate::qr;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::modules::module_exists;

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub module_id: String,
    pub status: String,
    pub secret: Option<String>,
}

pub fn load_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Option<SessionRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, module_id, status, secret FROM attendance_sessions WHERE id = ?",
        [session_id],
        |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                module_id: r.get(1)?,
                status: r.get(2)?,
                secret: r.get(3)?,
            })
        },
    )
    .optional()
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_lecturer(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_str(req, "date") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return err(&req.id, "bad_params", "date must be YYYY-MM-DD", None);
    }
    match module_exists(conn, &module_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let session_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO attendance_sessions(id, module_id, session_date, status, secret, created_at)
         VALUES(?, ?, ?, 'pending', NULL, ?)",
        (&session_id, &module_id, &date, Utc::now().to_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_sessions" })),
        );
    }
    ok(
        &req.id,
        json!({ "sessionId": session_id, "status": "pending", "date": date }),
    )
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match module_exists(conn, &module_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut stmt = match conn.prepare(
        "SELECT
           s.id, s.session_date, s.status, s.created_at,
           (SELECT COUNT(*) FROM attendance_records r WHERE r.session_id = s.id) AS marked_count
         FROM attendance_sessions s
         WHERE s.module_id = ?
         ORDER BY s.session_date, s.created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&module_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "date": row.get::<_, String>(1)?,
                "status": row.get::<_, String>(2)?,
                "createdAt": row.get::<_, String>(3)?,
                "markedCount": row.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sessions_activate(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_lecturer(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match load_session(conn, &session_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "session not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if session.status != "pending" {
        return err(
            &req.id,
            "bad_params",
            format!("only a pending session can be activated, status is {}", session.status),
            None,
        );
    }

    let secret = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "UPDATE attendance_sessions SET status = 'active', secret = ? WHERE id = ?",
        (&secret, &session_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_sessions" })),
        );
    }
    ok(&req.id, json!({ "sessionId": session_id, "status": "active" }))
}

fn handle_sessions_complete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_lecturer(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match load_session(conn, &session_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "session not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if session.status != "active" {
        return err(
            &req.id,
            "bad_params",
            format!("only an active session can be completed, status is {}", session.status),
            None,
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE attendance_sessions SET status = 'completed' WHERE id = ?",
        [&session_id],
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_sessions" })),
        );
    }
    ok(&req.id, json!({ "sessionId": session_id, "status": "completed" }))
}

fn handle_sessions_qr_payload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match load_session(conn, &session_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "session not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if session.status != "active" {
        return err(
            &req.id,
            "session_not_active",
            "qr payload is only issued for active sessions",
            Some(json!({ "status": session.status })),
        );
    }
    let Some(secret) = session.secret.as_deref() else {
        return err(&req.id, "db_query_failed", "active session has no secret", None);
    };

    let payload = qr::payload(secret, &session.id, Utc::now());
    match serde_json::to_value(&payload) {
        Ok(v) => ok(&req.id, json!({ "payload": v })),
        Err(e) => err(&req.id, "io_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.activate" => Some(handle_sessions_activate(state, req)),
        "sessions.complete" => Some(handle_sessions_complete(state, req)),
        "sessions.qrPayload" => Some(handle_sessions_qr_payload(state, req)),
        _ => None,
    }
}
