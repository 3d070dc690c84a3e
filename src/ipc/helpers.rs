use rusqlite::Connection;

use crate::calc::CalcError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Mutating lecturer operations require a logged-in lecturer session.
pub fn require_lecturer(state: &AppState, req: &Request) -> Result<(), serde_json::Value> {
    match state.session.as_ref() {
        Some(session) if session.role == "lecturer" => Ok(()),
        Some(_) => Err(err(
            &req.id,
            "not_auth",
            "this operation requires a lecturer session",
            None,
        )),
        None => Err(err(&req.id, "not_auth", "log in first", None)),
    }
}

pub fn calc_err(req_id: &str, e: CalcError) -> serde_json::Value {
    err(req_id, &e.code, e.message, e.details)
}
