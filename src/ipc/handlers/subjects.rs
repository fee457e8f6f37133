use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, code FROM subjects WHERE deleted_at IS NULL ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: Option<String> = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let code = req
        .params
        .get("code")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, &code),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(
        &req.id,
        json!({ "subjectId": subject_id, "name": name, "code": code }),
    )
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let code = req
        .params
        .get("code")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let updated = match conn.execute(
        "UPDATE subjects SET name = ?, code = ? WHERE id = ? AND deleted_at IS NULL",
        (&name, &code, &subject_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "subject not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ? AND deleted_at IS NULL",
            [&subject_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    // Soft delete; the row stays recoverable from trash.
    let deleted_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE subjects SET deleted_at = ? WHERE id = ?",
        (&deleted_at, &subject_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "deletedAt": deleted_at }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
