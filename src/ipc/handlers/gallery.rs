use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_gallery_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "items": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, description, file_name, checksum, created_at
         FROM gallery_items
         WHERE deleted_at IS NULL
         ORDER BY created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let file_name: String = row.get(3)?;
            let checksum: Option<String> = row.get(4)?;
            let created_at: String = row.get(5)?;
            Ok(json!({
                "id": id,
                "title": title,
                "description": description,
                "fileName": file_name,
                "checksum": checksum,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(items) => ok(&req.id, json!({ "items": items })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_gallery_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let file_name = match req.params.get("fileName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing fileName", None),
    };
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let checksum = req
        .params
        .get("checksum")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let item_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO gallery_items(id, title, description, file_name, checksum, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &item_id,
            &title,
            &description,
            &file_name,
            &checksum,
            &created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "gallery_items" })),
        );
    }

    ok(&req.id, json!({ "itemId": item_id, "createdAt": created_at }))
}

fn handle_gallery_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let item_id = match req.params.get("itemId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing itemId", None),
    };
    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let updated = match conn.execute(
        "UPDATE gallery_items SET title = ?, description = ?
         WHERE id = ? AND deleted_at IS NULL",
        (&title, &description, &item_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "gallery item not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_gallery_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let item_id = match req.params.get("itemId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing itemId", None),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM gallery_items WHERE id = ? AND deleted_at IS NULL",
            [&item_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "gallery item not found", None);
    }

    let deleted_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE gallery_items SET deleted_at = ? WHERE id = ?",
        (&deleted_at, &item_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "deletedAt": deleted_at }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gallery.list" => Some(handle_gallery_list(state, req)),
        "gallery.add" => Some(handle_gallery_add(state, req)),
        "gallery.update" => Some(handle_gallery_update(state, req)),
        "gallery.delete" => Some(handle_gallery_delete(state, req)),
        _ => None,
    }
}
