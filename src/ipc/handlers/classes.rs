use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.homeroom_teacher,
           (SELECT COUNT(*) FROM students s
             WHERE s.class_id = c.id AND s.deleted_at IS NULL) AS student_count,
           (SELECT COUNT(*) FROM schedule_slots sl
             WHERE sl.class_id = c.id) AS slot_count
         FROM classes c
         WHERE c.deleted_at IS NULL
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let homeroom_teacher: Option<String> = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let slot_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "name": name,
                "homeroomTeacher": homeroom_teacher,
                "studentCount": student_count,
                "slotCount": slot_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let homeroom_teacher = req
        .params
        .get("homeroomTeacher")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, homeroom_teacher) VALUES(?, ?, ?)",
        (&class_id, &name, &homeroom_teacher),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let homeroom_teacher = req
        .params
        .get("homeroomTeacher")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let updated = match conn.execute(
        "UPDATE classes SET name = ?, homeroom_teacher = ? WHERE id = ? AND deleted_at IS NULL",
        (&name, &homeroom_teacher, &class_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "class not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM classes WHERE id = ? AND deleted_at IS NULL",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    // Soft delete only; students, slots and rubrics stay attached so a
    // restore brings the class back whole. Hard removal goes through
    // trash.purge.
    let deleted_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE classes SET deleted_at = ? WHERE id = ?",
        (&deleted_at, &class_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "deletedAt": deleted_at }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
