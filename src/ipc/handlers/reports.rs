use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::Path;

use super::grades::load_student_grade;
use super::modules::module_exists;

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn write_text_file(path: &str, text: &str) -> Result<(), serde_json::Value> {
    let p = Path::new(path);
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Err(json!({ "code": "io_failed", "message": e.to_string() }));
            }
        }
    }
    std::fs::write(p, text)
        .map_err(|e| json!({ "code": "io_failed", "message": e.to_string() }))
}

fn io_err(req: &Request, detail: serde_json::Value, path: &str) -> serde_json::Value {
    err(
        &req.id,
        detail
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("io_failed"),
        detail
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("write failed")
            .to_string(),
        Some(json!({ "path": path })),
    )
}

fn list_enrolled(
    conn: &Connection,
    module_id: &str,
) -> Result<Vec<(String, String, String, String, Option<String>)>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.user_no, u.last_name, u.first_name, u.email
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         WHERE e.module_id = ?
         ORDER BY u.sort_order",
    )?;
    let rows = stmt
        .query_map([module_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect();
    rows
}

fn handle_module_grade_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match module_exists(conn, &module_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let students = match list_enrolled(conn, &module_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut csv = String::from(
        "user_no,last_name,first_name,email,present,late,absent,sessions,final_percent,letter\n",
    );
    let mut rows_exported = 0usize;
    for (student_id, user_no, last_name, first_name, email) in students {
        let grade = match load_student_grade(conn, &module_id, &student_id) {
            Ok(g) => g,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let (final_percent, letter) = match grade.final_grade() {
            Some(f) => (
                format!("{}", calc::round_mark(f)),
                calc::classify(f).letter.to_string(),
            ),
            None => (String::new(), String::new()),
        };
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            csv_quote(&user_no),
            csv_quote(&last_name),
            csv_quote(&first_name),
            csv_quote(email.as_deref().unwrap_or("")),
            grade.tally.present,
            grade.tally.late,
            grade.tally.absent,
            grade.tally.total,
            final_percent,
            csv_quote(&letter),
        ));
        rows_exported += 1;
    }

    if let Err(detail) = write_text_file(&out_path, &csv) {
        return io_err(req, detail, &out_path);
    }
    ok(
        &req.id,
        json!({ "ok": true, "rowsExported": rows_exported, "path": out_path }),
    )
}

fn handle_attendance_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match module_exists(conn, &module_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut stmt = match conn.prepare(
        "SELECT s.session_date, u.user_no, u.last_name, u.first_name, r.status, r.time_marked
         FROM attendance_records r
         JOIN attendance_sessions s ON s.id = r.session_id
         JOIN users u ON u.id = r.student_id
         WHERE s.module_id = ?
         ORDER BY s.session_date, s.created_at, u.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([&module_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut csv = String::from("session_date,user_no,last_name,first_name,status,time_marked\n");
    let rows_exported = rows.len();
    for (date, user_no, last_name, first_name, status, time_marked) in rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_quote(&date),
            csv_quote(&user_no),
            csv_quote(&last_name),
            csv_quote(&first_name),
            csv_quote(&status),
            csv_quote(time_marked.as_deref().unwrap_or("")),
        ));
    }

    if let Err(detail) = write_text_file(&out_path, &csv) {
        return io_err(req, detail, &out_path);
    }
    ok(
        &req.id,
        json!({ "ok": true, "rowsExported": rows_exported, "path": out_path }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.moduleGradeCsv" => Some(handle_module_grade_csv(state, req)),
        "reports.attendanceCsv" => Some(handle_attendance_csv(state, req)),
        _ => None,
    }
}
