use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, require_lecturer, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 2] = ["student", "lecturer"];

fn validate_role(req: &Request, role: &str) -> Result<(), serde_json::Value> {
    if ROLES.contains(&role) {
        Ok(())
    } else {
        Err(err(
            &req.id,
            "bad_params",
            "role must be one of: student, lecturer",
            Some(json!({ "role": role })),
        ))
    }
}

fn next_sort_order(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM users",
        [],
        |r| r.get(0),
    )
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_no = match required_str(req, "userNo") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let role = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = validate_role(req, &role) {
        return e;
    }
    if user_no.is_empty() || last_name.is_empty() {
        return err(&req.id, "bad_params", "userNo and lastName must not be empty", None);
    }
    let email = optional_str(req, "email");

    let sort_order = match next_sort_order(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, user_no, last_name, first_name, email, role, active, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (&user_id, &user_no, &last_name, &first_name, &email, &role, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(&req.id, json!({ "userId": user_id, "userNo": user_no }))
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };
    let role = optional_str(req, "role");

    let sql = match role {
        Some(_) => {
            "SELECT id, user_no, last_name, first_name, email, role, active, sort_order
             FROM users WHERE role = ? ORDER BY sort_order"
        }
        None => {
            "SELECT id, user_no, last_name, first_name, email, role, active, sort_order
             FROM users ORDER BY sort_order"
        }
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
        let last: String = row.get(2)?;
        let first: String = row.get(3)?;
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "userNo": row.get::<_, String>(1)?,
            "displayName": format!("{}, {}", last, first),
            "email": row.get::<_, Option<String>>(4)?,
            "role": row.get::<_, String>(5)?,
            "active": row.get::<_, i64>(6)? != 0,
            "sortOrder": row.get::<_, i64>(7)?,
        }))
    }

    let rows = match role {
        Some(r) => stmt
            .query_map([r], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    };
    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_lecturer(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = patch.get("lastName") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.lastName must be a string", None);
        };
        set_parts.push("last_name = ?".into());
        binds.push(rusqlite::types::Value::Text(s.trim().to_string()));
    }
    if let Some(v) = patch.get("firstName") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.firstName must be a string", None);
        };
        set_parts.push("first_name = ?".into());
        binds.push(rusqlite::types::Value::Text(s.trim().to_string()));
    }
    if let Some(v) = patch.get("email") {
        if v.is_null() {
            set_parts.push("email = NULL".into());
        } else if let Some(s) = v.as_str() {
            set_parts.push("email = ?".into());
            binds.push(rusqlite::types::Value::Text(s.trim().to_string()));
        } else {
            return err(&req.id, "bad_params", "patch.email must be string or null", None);
        }
    }
    if let Some(v) = patch.get("active") {
        let Some(b) = v.as_bool() else {
            return err(&req.id, "bad_params", "patch.active must be a boolean", None);
        };
        set_parts.push("active = ?".into());
        binds.push(rusqlite::types::Value::Integer(if b { 1 } else { 0 }));
    }

    if set_parts.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    let sql = format!("UPDATE users SET {} WHERE id = ?", set_parts.join(", "));
    binds.push(rusqlite::types::Value::Text(user_id.clone()));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(binds)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

const IMPORT_HEADER: [&str; 5] = ["user_no", "last_name", "first_name", "email", "role"];

fn handle_users_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_lecturer(state, req) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let csv_path = match required_str(req, "csvPath") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let text = match std::fs::read_to_string(&csv_path) {
        Ok(t) => t,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                format!("failed to read {}: {}", csv_path, e),
                None,
            )
        }
    };
    let mut lines = text.lines();
    let Some(header_line) = lines.next() else {
        return err(&req.id, "bad_params", "csv file is empty", None);
    };
    let header: Vec<String> = parse_csv_record(header_line)
        .into_iter()
        .map(|f| f.trim().to_ascii_lowercase())
        .collect();
    if header != IMPORT_HEADER {
        return err(
            &req.id,
            "bad_params",
            format!("csv header must be {}", IMPORT_HEADER.join(",")),
            Some(json!({ "header": header })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut inserted = 0usize;
    let mut updated = 0usize;
    let mut skipped: Vec<usize> = Vec::new();
    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_record(line);
        if fields.len() != IMPORT_HEADER.len() {
            skipped.push(line_no + 2);
            continue;
        }
        let user_no = fields[0].trim().to_string();
        let last_name = fields[1].trim().to_string();
        let first_name = fields[2].trim().to_string();
        let email = fields[3].trim().to_string();
        let role = fields[4].trim().to_ascii_lowercase();
        if user_no.is_empty() || last_name.is_empty() || !ROLES.contains(&role.as_str()) {
            skipped.push(line_no + 2);
            continue;
        }
        let email = if email.is_empty() { None } else { Some(email) };

        let existing: Option<String> = match tx
            .query_row("SELECT id FROM users WHERE user_no = ?", [&user_no], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_query_failed", e.to_string(), None);
            }
        };

        let res = match existing {
            Some(id) => {
                updated += 1;
                tx.execute(
                    "UPDATE users SET last_name = ?, first_name = ?, email = ?, role = ? WHERE id = ?",
                    (&last_name, &first_name, &email, &role, &id),
                )
            }
            None => {
                inserted += 1;
                let sort_order = match next_sort_order(&tx) {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = tx.rollback();
                        return err(&req.id, "db_query_failed", e.to_string(), None);
                    }
                };
                tx.execute(
                    "INSERT INTO users(id, user_no, last_name, first_name, email, role, active, sort_order)
                     VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
                    (
                        &Uuid::new_v4().to_string(),
                        &user_no,
                        &last_name,
                        &first_name,
                        &email,
                        &role,
                        sort_order,
                    ),
                )
            }
        };
        if let Err(e) = res {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "users", "line": line_no + 2 })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "inserted": inserted, "updated": updated, "skippedLines": skipped }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.importCsv" => Some(handle_users_import_csv(state, req)),
        _ => None,
    }
}
