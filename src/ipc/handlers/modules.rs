use crate::calc::GradeWeights;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, require_lecturer, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub fn module_exists(conn: &Connection, module_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM modules WHERE id = ?", [module_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn module_weights(conn: &Connection, module_id: &str) -> Result<Option<GradeWeights>, rusqlite::Error> {
    conn.query_row(
        "SELECT weight_attendance, weight_assignments, weight_test, weight_final_exam
         FROM modules WHERE id = ?",
        [module_id],
        |r| {
            Ok(GradeWeights {
                attendance: r.get(0)?,
                assignments: r.get(1)?,
                test: r.get(2)?,
                final_exam: r.get(3)?,
            })
        },
    )
    .optional()
}

pub fn is_enrolled(
    conn: &Connection,
    module_id: &str,
    student_id: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM enrollments WHERE module_id = ? AND student_id = ?",
        (module_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn parse_weights(req: &Request, value: &serde_json::Value) -> Result<GradeWeights, serde_json::Value> {
    let weights: GradeWeights = match serde_json::from_value(value.clone()) {
        Ok(w) => w,
        Err(e) => {
            return Err(err(
                &req.id,
                "bad_params",
                format!("weights must be {{attendance, assignments, test, finalExam}}: {}", e),
                None,
            ))
        }
    };
    weights.validate().map_err(|e| calc_err(&req.id, e))?;
    Ok(weights)
}

fn handle_modules_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_lecturer(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if code.is_empty() || name.is_empty() {
        return err(&req.id, "bad_params", "code and name must not be empty", None);
    }
    let credit_hours = match req.params.get("creditHours").and_then(|v| v.as_f64()) {
        Some(v) if v > 0.0 => v,
        Some(_) => return err(&req.id, "bad_params", "creditHours must be positive", None),
        None => return err(&req.id, "bad_params", "missing creditHours", None),
    };
    let Some(weights_raw) = req.params.get("weights") else {
        return err(&req.id, "bad_params", "missing weights", None);
    };
    let weights = match parse_weights(req, weights_raw) {
        Ok(w) => w,
        Err(e) => return e,
    };

    let module_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO modules(id, code, name, credit_hours,
            weight_attendance, weight_assignments, weight_test, weight_final_exam)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &module_id,
            &code,
            &name,
            credit_hours,
            weights.attendance,
            weights.assignments,
            weights.test,
            weights.final_exam,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "modules" })),
        );
    }

    ok(&req.id, json!({ "moduleId": module_id, "code": code }))
}

fn handle_modules_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "modules": [] }));
    };

    // Correlated subqueries so enrollment/session counts never double-count.
    let mut stmt = match conn.prepare(
        "SELECT
           m.id, m.code, m.name, m.credit_hours,
           m.weight_attendance, m.weight_assignments, m.weight_test, m.weight_final_exam,
           (SELECT COUNT(*) FROM enrollments e WHERE e.module_id = m.id) AS enrolled_count,
           (SELECT COUNT(*) FROM attendance_sessions s WHERE s.module_id = m.id) AS session_count
         FROM modules m
         ORDER BY m.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "code": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "creditHours": row.get::<_, f64>(3)?,
                "weights": {
                    "attendance": row.get::<_, f64>(4)?,
                    "assignments": row.get::<_, f64>(5)?,
                    "test": row.get::<_, f64>(6)?,
                    "finalExam": row.get::<_, f64>(7)?,
                },
                "enrolledCount": row.get::<_, i64>(8)?,
                "sessionCount": row.get::<_, i64>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(modules) => ok(&req.id, json!({ "modules": modules })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_modules_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    match module_exists(conn, &module_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "patch.name must be a non-empty string", None);
        };
        set_parts.push("name = ?".into());
        binds.push(rusqlite::types::Value::Text(s.to_string()));
    }
    if let Some(v) = patch.get("creditHours") {
        let Some(n) = v.as_f64().filter(|n| *n > 0.0) else {
            return err(&req.id, "bad_params", "patch.creditHours must be positive", None);
        };
        set_parts.push("credit_hours = ?".into());
        binds.push(rusqlite::types::Value::Real(n));
    }
    if let Some(v) = patch.get("weights") {
        let weights = match parse_weights(req, v) {
            Ok(w) => w,
            Err(e) => return e,
        };
        set_parts.push("weight_attendance = ?".into());
        binds.push(rusqlite::types::Value::Real(weights.attendance));
        set_parts.push("weight_assignments = ?".into());
        binds.push(rusqlite::types::Value::Real(weights.assignments));
        set_parts.push("weight_test = ?".into());
        binds.push(rusqlite::types::Value::Real(weights.test));
        set_parts.push("weight_final_exam = ?".into());
        binds.push(rusqlite::types::Value::Real(weights.final_exam));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let sql = format!("UPDATE modules SET {} WHERE id = ?", set_parts.join(", "));
    binds.push(rusqlite::types::Value::Text(module_id));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(binds)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "modules" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_modules_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match module_exists(conn, &module_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency order (no ON DELETE CASCADE).
    let steps: [(&str, &str); 5] = [
        (
            "DELETE FROM attendance_records
             WHERE session_id IN (SELECT id FROM attendance_sessions WHERE module_id = ?)",
            "attendance_records",
        ),
        (
            "DELETE FROM attendance_sessions WHERE module_id = ?",
            "attendance_sessions",
        ),
        (
            "DELETE FROM grade_components WHERE module_id = ?",
            "grade_components",
        ),
        ("DELETE FROM enrollments WHERE module_id = ?", "enrollments"),
        ("DELETE FROM modules WHERE id = ?", "modules"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&module_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_modules_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match module_exists(conn, &module_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let student: Option<(String, i64)> = match conn
        .query_row(
            "SELECT role, active FROM users WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match student {
        None => return err(&req.id, "not_found", "student not found", None),
        Some((role, _)) if role != "student" => {
            return err(&req.id, "bad_params", "only students can be enrolled", None)
        }
        Some((_, active)) if active == 0 => {
            return err(&req.id, "bad_params", "student is inactive", None)
        }
        Some(_) => {}
    }

    let already = match is_enrolled(conn, &module_id, &student_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !already {
        if let Err(e) = conn.execute(
            "INSERT INTO enrollments(module_id, student_id) VALUES(?, ?)",
            (&module_id, &student_id),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments" })),
            );
        }
    }
    ok(&req.id, json!({ "enrolled": true, "alreadyEnrolled": already }))
}

fn handle_modules_unenroll(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match conn.execute(
        "DELETE FROM enrollments WHERE module_id = ? AND student_id = ?",
        (&module_id, &student_id),
    ) {
        Ok(n) => ok(&req.id, json!({ "removed": n > 0 })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        ),
    }
}

fn handle_modules_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "SELECT u.id, u.user_no, u.last_name, u.first_name, u.email, u.active
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         WHERE e.module_id = ?
         ORDER BY u.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&module_id], |row| {
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            Ok(json!({
                "studentId": row.get::<_, String>(0)?,
                "userNo": row.get::<_, String>(1)?,
                "displayName": format!("{}, {}", last, first),
                "email": row.get::<_, Option<String>>(4)?,
                "active": row.get::<_, i64>(5)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "modules.create" => Some(handle_modules_create(state, req)),
        "modules.list" => Some(handle_modules_list(state, req)),
        "modules.update" => Some(handle_modules_update(state, req)),
        "modules.delete" => Some(handle_modules_delete(state, req)),
        "modules.enroll" => Some(handle_modules_enroll(state, req)),
        "modules.unenroll" => Some(handle_modules_unenroll(state, req)),
        "modules.roster" => Some(handle_modules_roster(state, req)),
        _ => None,
    }
}
