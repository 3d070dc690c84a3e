use crate::calc::{self, Component, ComponentMarks};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_lecturer, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use super::attendance::load_tally;
use super::modules::{is_enrolled, module_weights};

/// One student's recomputed standing in one module. The final grade is
/// derived on every read, never read back from storage.
pub struct StudentModuleGrade {
    pub tally: calc::AttendanceTally,
    pub marks: ComponentMarks,
    pub graded: bool,
}

impl StudentModuleGrade {
    pub fn attendance_score(&self) -> f64 {
        self.tally.score()
    }

    pub fn final_grade(&self) -> Option<f64> {
        if !self.graded {
            return None;
        }
        Some(calc::final_grade(self.attendance_score(), &self.marks))
    }
}

pub fn load_student_grade(
    conn: &Connection,
    module_id: &str,
    student_id: &str,
) -> Result<StudentModuleGrade, rusqlite::Error> {
    let tally = load_tally(conn, module_id, student_id)?;

    let mut stmt = conn.prepare(
        "SELECT component, points FROM grade_components
         WHERE module_id = ? AND student_id = ?",
    )?;
    let rows = stmt
        .query_map((module_id, student_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut marks = ComponentMarks::default();
    let graded = !rows.is_empty();
    for (component, points) in rows {
        match Component::parse(&component) {
            Some(Component::Assignment) => marks.assignment = points,
            Some(Component::Test) => marks.test = points,
            Some(Component::Exam) => marks.exam = points,
            None => {}
        }
    }

    Ok(StudentModuleGrade {
        tally,
        marks,
        graded,
    })
}

fn grade_row_json(grade: &StudentModuleGrade) -> serde_json::Value {
    let attendance_score = calc::round_mark(grade.attendance_score());
    match grade.final_grade() {
        Some(final_raw) => {
            let letter = calc::classify(final_raw);
            json!({
                "attendance": {
                    "present": grade.tally.present,
                    "late": grade.tally.late,
                    "absent": grade.tally.absent,
                    "total": grade.tally.total,
                    "score": attendance_score,
                },
                "components": {
                    "assignment": grade.marks.assignment,
                    "test": grade.marks.test,
                    "exam": grade.marks.exam,
                },
                "finalGrade": calc::round_mark(final_raw),
                "letter": letter.letter,
                "gradePoints": letter.points,
                "clamped": letter.clamped,
                "graded": true,
            })
        }
        None => json!({
            "attendance": {
                "present": grade.tally.present,
                "late": grade.tally.late,
                "absent": grade.tally.absent,
                "total": grade.tally.total,
                "score": attendance_score,
            },
            "components": serde_json::Value::Null,
            "finalGrade": serde_json::Value::Null,
            "letter": serde_json::Value::Null,
            "gradePoints": serde_json::Value::Null,
            "clamped": false,
            "graded": false,
        }),
    }
}

fn handle_set_component(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let component_raw = match required_str(req, "component") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(component) = Component::parse(&component_raw) else {
        return err(
            &req.id,
            "bad_params",
            "component must be one of: assignment, test, exam",
            None,
        );
    };
    let points = match required_f64(req, "points") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let weights = match module_weights(conn, &module_id) {
        Ok(Some(w)) => w,
        Ok(None) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Component scores are stored pre-weighted, so the module weight is the
    // ceiling for that component.
    let max = weights.component_max(component);
    if !points.is_finite() || points < 0.0 || points > max {
        return err(
            &req.id,
            "bad_params",
            format!("points for {} must be within [0, {}]", component.as_str(), max),
            Some(json!({ "min": 0.0, "max": max })),
        );
    }

    match is_enrolled(conn, &module_id, &student_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_enrolled",
                "student is not enrolled in this module",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO grade_components(id, module_id, student_id, component, points)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(module_id, student_id, component) DO UPDATE SET
           points = excluded.points",
        (
            Uuid::new_v4().to_string(),
            &module_id,
            &student_id,
            component.as_str(),
            points,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "grade_components" })),
        );
    }
    ok(
        &req.id,
        json!({ "ok": true, "component": component.as_str(), "points": points }),
    )
}

fn handle_student_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match is_enrolled(conn, &module_id, &student_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_enrolled",
                "student is not enrolled in this module",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match load_student_grade(conn, &module_id, &student_id) {
        Ok(grade) => ok(&req.id, grade_row_json(&grade)),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let module_id = match required_str(req, "moduleId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weights = match module_weights(conn, &module_id) {
        Ok(Some(w)) => w,
        Ok(None) => return err(&req.id, "not_found", "module not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.user_no, u.last_name, u.first_name, u.email
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         WHERE e.module_id = ?
         ORDER BY u.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match stmt
        .query_map([&module_id], |row| {
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                format!("{}, {}", last, first),
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    for (student_id, user_no, display_name, email) in students {
        let grade = match load_student_grade(conn, &module_id, &student_id) {
            Ok(g) => g,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let mut row = grade_row_json(&grade);
        row["studentId"] = json!(student_id);
        row["userNo"] = json!(user_no);
        row["displayName"] = json!(display_name);
        row["email"] = json!(email);
        rows.push(row);
    }

    ok(
        &req.id,
        json!({
            "moduleId": module_id,
            "weights": {
                "attendance": weights.attendance,
                "assignments": weights.assignments,
                "test": weights.test,
                "finalExam": weights.final_exam,
            },
            "rows": rows,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.setComponent" => Some(handle_set_component(state, req)),
        "grades.studentSummary" => Some(handle_student_summary(state, req)),
        "grades.sheet" => Some(handle_sheet(state, req)),
        _ => None,
    }
}
