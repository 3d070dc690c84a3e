use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The one session-context object. Views receive it through `auth.whoami`
/// instead of reading ad-hoc global state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
    pub token: String,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<SessionContext>,
}
