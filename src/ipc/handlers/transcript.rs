use crate::calc::{self, ModuleStanding};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

use super::grades::load_student_grade;

fn handle_transcript_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT user_no, last_name, first_name FROM users WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((user_no, last_name, first_name)) = student else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT m.id, m.code, m.name, m.credit_hours
         FROM enrollments e
         JOIN modules m ON m.id = e.module_id
         WHERE e.student_id = ?
         ORDER BY m.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let modules = match stmt
        .query_map([&student_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut standings: Vec<ModuleStanding> = Vec::with_capacity(modules.len());
    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(modules.len());
    for (module_id, code, name, credit_hours) in modules {
        let grade = match load_student_grade(conn, &module_id, &student_id) {
            Ok(g) => g,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let final_grade = grade.final_grade();
        standings.push(ModuleStanding {
            credit_hours,
            final_grade,
        });
        rows.push(match final_grade {
            Some(f) => {
                let letter = calc::classify(f);
                json!({
                    "moduleId": module_id,
                    "code": code,
                    "name": name,
                    "creditHours": credit_hours,
                    "finalGrade": calc::round_mark(f),
                    "letter": letter.letter,
                    "gradePoints": letter.points,
                })
            }
            None => json!({
                "moduleId": module_id,
                "code": code,
                "name": name,
                "creditHours": credit_hours,
                "finalGrade": serde_json::Value::Null,
                "letter": serde_json::Value::Null,
                "gradePoints": serde_json::Value::Null,
            }),
        });
    }

    let summary = calc::cgpa_summary(&standings);
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "userNo": user_no,
            "displayName": format!("{}, {}", last_name, first_name),
            "modules": rows,
            "totals": {
                "totalCredits": summary.total_credits,
                "earnedCredits": summary.earned_credits,
                "qualityPoints": calc::round_mark(summary.quality_points),
                "cgpa": calc::round_mark(summary.cgpa),
            },
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "transcript.open" => Some(handle_transcript_open(state, req)),
        _ => None,
    }
}
