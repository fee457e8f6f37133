use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const TOKEN_KEY: &str = "session.token";
const USER_KEY: &str = "session.user";

fn handle_session_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let token = match req.params.get("token").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing token", None),
    };
    let user = req.params.get("user").cloned();
    if let Some(u) = &user {
        if !u.is_object() {
            return err(&req.id, "bad_params", "user must be an object", None);
        }
    }

    if let Err(e) = db::settings_set_json(conn, TOKEN_KEY, &json!(token)) {
        return err(&req.id, "db_update_failed", format!("{e:?}"), None);
    }
    if let Some(u) = user {
        if let Err(e) = db::settings_set_json(conn, USER_KEY, &u) {
            return err(&req.id, "db_update_failed", format!("{e:?}"), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_session_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let token = match db::settings_get_json(conn, TOKEN_KEY) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
    };
    let user = match db::settings_get_json(conn, USER_KEY) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
    };

    ok(
        &req.id,
        json!({
            "token": token,
            "user": user,
        }),
    )
}

fn handle_session_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Err(e) = db::settings_delete(conn, TOKEN_KEY) {
        return err(&req.id, "db_delete_failed", format!("{e:?}"), None);
    }
    if let Err(e) = db::settings_delete(conn, USER_KEY) {
        return err(&req.id, "db_delete_failed", format!("{e:?}"), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.set" => Some(handle_session_set(state, req)),
        "session.get" => Some(handle_session_get(state, req)),
        "session.clear" => Some(handle_session_clear(state, req)),
        _ => None,
    }
}
