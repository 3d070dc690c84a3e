use crate::calc::{self, AttendanceStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_lecturer;
use crate::ipc::types::{AppState, Request};
use crate::qr;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::modules::is_enrolled;
use super::sessions::{load_session, SessionRow};

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn require_session(conn: &Connection, session_id: &str) -> Result<SessionRow, HandlerErr> {
    load_session(conn, session_id)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::new("not_found", "session not found"))
}

fn require_enrollment(
    conn: &Connection,
    module_id: &str,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let enrolled = is_enrolled(conn, module_id, student_id).map_err(HandlerErr::db)?;
    if enrolled {
        Ok(())
    } else {
        Err(HandlerErr::new(
            "not_enrolled",
            "student is not enrolled in this module",
        ))
    }
}

fn upsert_mark(
    conn: &Connection,
    session_id: &str,
    student_id: &str,
    status: AttendanceStatus,
) -> Result<(), HandlerErr> {
    // time_marked is written once, on first marking, and preserved after.
    conn.execute(
        "INSERT INTO attendance_records(id, session_id, student_id, status, time_marked)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(session_id, student_id) DO UPDATE SET
           status = excluded.status",
        (
            Uuid::new_v4().to_string(),
            session_id,
            student_id,
            status.as_str(),
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_records" })),
    })?;
    Ok(())
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let status_raw = get_required_str(params, "status")?;
    let Some(status) = AttendanceStatus::parse(&status_raw) else {
        return Err(HandlerErr::new(
            "bad_params",
            "status must be one of: present, late, absent",
        ));
    };

    let session = require_session(conn, &session_id)?;
    if session.status == "completed" {
        return Err(HandlerErr::new(
            "session_completed",
            "attendance is frozen once a session is completed",
        ));
    }
    require_enrollment(conn, &session.module_id, &student_id)?;

    upsert_mark(conn, &session_id, &student_id, status)?;
    Ok(json!({ "ok": true, "status": status.as_str() }))
}

fn attendance_checkin(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    let token = get_required_str(params, "token")?;
    let student_id = get_required_str(params, "studentId")?;

    let session = require_session(conn, &attendance_id)?;
    if session.status != "active" {
        return Err(HandlerErr {
            code: "session_not_active",
            message: "check-in is only open while the session is active".to_string(),
            details: Some(json!({ "status": session.status })),
        });
    }
    let secret = session
        .secret
        .as_deref()
        .ok_or_else(|| HandlerErr::new("db_query_failed", "active session has no secret"))?;
    if !qr::verify_token(secret, &session.id, &token) {
        return Err(HandlerErr::new("token_invalid", "check-in token rejected"));
    }
    require_enrollment(conn, &session.module_id, &student_id)?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT status FROM attendance_records WHERE session_id = ? AND student_id = ?",
            (&session.id, &student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if let Some(status) = existing {
        return Err(HandlerErr {
            code: "already_marked",
            message: "attendance already recorded for this session".to_string(),
            details: Some(json!({ "status": status })),
        });
    }

    let time_marked = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO attendance_records(id, session_id, student_id, status, time_marked)
         VALUES(?, ?, ?, 'present', ?)",
        (
            Uuid::new_v4().to_string(),
            &session.id,
            &student_id,
            &time_marked,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance_records" })),
    })?;

    Ok(json!({ "marked": "present", "timeMarked": time_marked }))
}

fn attendance_session_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = require_session(conn, &session_id)?;

    let (date, created_at): (String, String) = conn
        .query_row(
            "SELECT session_date, created_at FROM attendance_sessions WHERE id = ?",
            [&session_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db)?;

    let mut stmt = conn
        .prepare(
            "SELECT u.id, u.user_no, u.last_name, u.first_name, r.status, r.time_marked
             FROM enrollments e
             JOIN users u ON u.id = e.student_id
             LEFT JOIN attendance_records r
               ON r.session_id = ? AND r.student_id = u.id
             WHERE e.module_id = ?
             ORDER BY u.sort_order",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&session_id, &session.module_id), |row| {
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            Ok(json!({
                "studentId": row.get::<_, String>(0)?,
                "userNo": row.get::<_, String>(1)?,
                "displayName": format!("{}, {}", last, first),
                "status": row.get::<_, Option<String>>(4)?,
                "timeMarked": row.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({
        "sessionId": session.id,
        "moduleId": session.module_id,
        "date": date,
        "status": session.status,
        "createdAt": created_at,
        "rows": rows,
    }))
}

pub fn load_tally(
    conn: &Connection,
    module_id: &str,
    student_id: &str,
) -> Result<calc::AttendanceTally, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT r.status
         FROM attendance_records r
         JOIN attendance_sessions s ON s.id = r.session_id
         WHERE s.module_id = ? AND r.student_id = ?
         ORDER BY s.session_date, s.created_at",
    )?;
    let statuses = stmt
        .query_map((module_id, student_id), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(calc::attendance_tally(
        statuses
            .iter()
            .filter_map(|s| AttendanceStatus::parse(s)),
    ))
}

fn attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let module_id = get_required_str(params, "moduleId")?;
    let student_id = get_required_str(params, "studentId")?;
    require_enrollment(conn, &module_id, &student_id)?;

    let tally = load_tally(conn, &module_id, &student_id).map_err(HandlerErr::db)?;
    Ok(json!({
        "present": tally.present,
        "late": tally.late,
        "absent": tally.absent,
        "total": tally.total,
        "score": calc::round_mark(tally.score()),
    }))
}

fn with_conn<F>(state: &mut AppState, req: &Request, requires_lecturer: bool, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    if requires_lecturer {
        if let Err(e) = require_lecturer(state, req) {
            return e;
        }
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_conn(state, req, true, attendance_mark)),
        "attendance.checkin" => Some(with_conn(state, req, false, attendance_checkin)),
        "attendance.sessionOpen" => Some(with_conn(state, req, false, attendance_session_open)),
        "attendance.summary" => Some(with_conn(state, req, false, attendance_summary)),
        _ => None,
    }
}
