use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request, SessionContext};
use rusqlite::OptionalExtension;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use uuid::Uuid;

fn mint_token() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let user_no = match required_str(req, "userNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let row: Option<(String, String, String, String, i64)> = match conn
        .query_row(
            "SELECT id, last_name, first_name, role, active FROM users WHERE user_no = ?",
            [&user_no],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((user_id, last_name, first_name, role, active)) = row else {
        return err(&req.id, "not_found", "user not found", None);
    };
    if active == 0 {
        return err(&req.id, "not_auth", "user is inactive", None);
    }

    let session = SessionContext {
        user_id: user_id.clone(),
        display_name: format!("{}, {}", last_name, first_name),
        role: role.clone(),
        token: mint_token(),
    };
    let result = json!({
        "userId": session.user_id,
        "displayName": session.display_name,
        "role": session.role,
        "token": session.token,
    });
    state.session = Some(session);
    ok(&req.id, result)
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was_logged_in = state.session.take().is_some();
    ok(&req.id, json!({ "loggedOut": was_logged_in }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.session.as_ref() {
        Some(session) => ok(
            &req.id,
            json!({
                "userId": session.user_id,
                "displayName": session.display_name,
                "role": session.role,
            }),
        ),
        None => err(&req.id, "not_auth", "no active session", None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
