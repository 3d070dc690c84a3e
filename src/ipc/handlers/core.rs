use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            // Best-effort bookkeeping; must not prevent the workspace from opening.
            let previous_open = db::settings_get_json(&conn, "workspace.last_opened")
                .ok()
                .flatten();
            let _ = db::settings_set_json(
                &conn,
                "workspace.last_opened",
                &json!({ "at": Utc::now().to_rfc3339(), "appVersion": env!("CARGO_PKG_VERSION") }),
            );

            state.db = Some(conn);
            // A login belongs to one workspace.
            state.session = None;
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "previousOpen": previous_open,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
