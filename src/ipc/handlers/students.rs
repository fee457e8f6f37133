use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM classes WHERE id = ? AND deleted_at IS NULL",
        [class_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    match class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut stmt = match conn.prepare(
        "SELECT id, full_name, student_no, sort_order FROM students
         WHERE class_id = ? AND deleted_at IS NULL
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let full_name: String = row.get(1)?;
            let student_no: Option<String> = row.get(2)?;
            let sort_order: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "fullName": full_name,
                "studentNo": student_no,
                "sortOrder": sort_order
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let full_name = match req.params.get("fullName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing fullName", None),
    };
    if full_name.is_empty() {
        return err(&req.id, "bad_params", "fullName must not be empty", None);
    }
    let student_no = req
        .params
        .get("studentNo")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, full_name, student_no, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        (&student_id, &class_id, &full_name, &student_no, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "sortOrder": sort_order }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let full_name = match req.params.get("fullName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing fullName", None),
    };
    if full_name.is_empty() {
        return err(&req.id, "bad_params", "fullName must not be empty", None);
    }
    let student_no = req
        .params
        .get("studentNo")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let updated = match conn.execute(
        "UPDATE students SET full_name = ?, student_no = ? WHERE id = ? AND deleted_at IS NULL",
        (&full_name, &student_no, &student_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let Some(ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds[]", None);
    };
    let mut student_ids = Vec::with_capacity(ids.len());
    for v in ids {
        match v.as_str() {
            Some(s) => student_ids.push(s.to_string()),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "studentIds must be an array of ids",
                    None,
                )
            }
        }
    }

    match class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    for (i, sid) in student_ids.iter().enumerate() {
        let updated = match tx.execute(
            "UPDATE students SET sort_order = ?
             WHERE id = ? AND class_id = ? AND deleted_at IS NULL",
            (i as i64, sid, &class_id),
        ) {
            Ok(n) => n,
            Err(e) => {
                let _ = tx.rollback();
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        };
        if updated == 0 {
            let _ = tx.rollback();
            return err(
                &req.id,
                "not_found",
                "student not in class",
                Some(json!({ "studentId": sid })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "count": student_ids.len() }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND deleted_at IS NULL",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let deleted_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE students SET deleted_at = ? WHERE id = ?",
        (&deleted_at, &student_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "deletedAt": deleted_at }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.reorder" => Some(handle_students_reorder(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
