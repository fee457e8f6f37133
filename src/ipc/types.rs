use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line on stdin. `params` defaults to null so bare
/// `{id, method}` calls stay valid.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Session state: the selected workspace directory and the cache database
/// inside it. Both absent until `workspace.select` succeeds.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
