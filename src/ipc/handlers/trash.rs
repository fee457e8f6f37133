use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

#[derive(Clone, Copy, PartialEq, Eq)]
enum TrashKind {
    Subject,
    Class,
    Student,
    GalleryItem,
}

impl TrashKind {
    fn parse(s: &str) -> Option<TrashKind> {
        match s {
            "subject" => Some(TrashKind::Subject),
            "class" => Some(TrashKind::Class),
            "student" => Some(TrashKind::Student),
            "galleryItem" => Some(TrashKind::GalleryItem),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            TrashKind::Subject => "subject",
            TrashKind::Class => "class",
            TrashKind::Student => "student",
            TrashKind::GalleryItem => "galleryItem",
        }
    }

    fn table(self) -> &'static str {
        match self {
            TrashKind::Subject => "subjects",
            TrashKind::Class => "classes",
            TrashKind::Student => "students",
            TrashKind::GalleryItem => "gallery_items",
        }
    }

    fn display_column(self) -> &'static str {
        match self {
            TrashKind::Subject | TrashKind::Class => "name",
            TrashKind::Student => "full_name",
            TrashKind::GalleryItem => "title",
        }
    }
}

const ALL_KINDS: [TrashKind; 4] = [
    TrashKind::Subject,
    TrashKind::Class,
    TrashKind::Student,
    TrashKind::GalleryItem,
];

fn handle_trash_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "items": [] }));
    };

    let mut items: Vec<(String, serde_json::Value)> = Vec::new();
    for kind in ALL_KINDS {
        let sql = format!(
            "SELECT id, {}, deleted_at FROM {} WHERE deleted_at IS NOT NULL",
            kind.display_column(),
            kind.table()
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let display: String = row.get(1)?;
                let deleted_at: String = row.get(2)?;
                Ok((
                    deleted_at.clone(),
                    json!({
                        "kind": kind.as_str(),
                        "id": id,
                        "name": display,
                        "deletedAt": deleted_at
                    }),
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(mut v) => items.append(&mut v),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    // Most recently deleted first.
    items.sort_by(|a, b| b.0.cmp(&a.0));
    let items: Vec<serde_json::Value> = items.into_iter().map(|(_, v)| v).collect();

    ok(&req.id, json!({ "items": items }))
}

fn parse_kind_and_id(req: &Request) -> Result<(TrashKind, String), serde_json::Value> {
    let kind = match req.params.get("kind").and_then(|v| v.as_str()) {
        Some(raw) => match TrashKind::parse(raw) {
            Some(k) => k,
            None => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "kind must be one of: subject, class, student, galleryItem",
                    Some(json!({ "kind": raw })),
                ))
            }
        },
        None => return Err(err(&req.id, "bad_params", "missing kind", None)),
    };
    let id = match req.params.get("id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return Err(err(&req.id, "bad_params", "missing id", None)),
    };
    Ok((kind, id))
}

fn is_trashed(conn: &Connection, kind: TrashKind, id: &str) -> Result<bool, rusqlite::Error> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE id = ? AND deleted_at IS NOT NULL",
        kind.table()
    );
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}

fn handle_trash_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (kind, id) = match parse_kind_and_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match is_trashed(conn, kind, &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "item not in trash", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // A student only makes sense inside a live class.
    if kind == TrashKind::Student {
        let class_alive: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM classes c
                 JOIN students s ON s.class_id = c.id
                 WHERE s.id = ? AND c.deleted_at IS NULL",
                [&id],
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if class_alive.is_none() {
            return err(
                &req.id,
                "parent_deleted",
                "restore the class before its students",
                None,
            );
        }
    }

    let sql = format!("UPDATE {} SET deleted_at = NULL WHERE id = ?", kind.table());
    if let Err(e) = conn.execute(&sql, [&id]) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_trash_purge(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (kind, id) = match parse_kind_and_id(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match is_trashed(conn, kind, &id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "item not in trash", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency-ordered deletes (no ON DELETE CASCADE).
    let steps: Vec<(&str, &str)> = match kind {
        TrashKind::Subject => vec![
            (
                "DELETE FROM grade_scores
                 WHERE column_id IN (
                   SELECT c.id FROM grade_columns c
                   JOIN grade_structures gs ON gs.id = c.structure_id
                   WHERE gs.subject_id = ?
                 )",
                "grade_scores",
            ),
            (
                "DELETE FROM grade_columns
                 WHERE structure_id IN (SELECT id FROM grade_structures WHERE subject_id = ?)",
                "grade_columns",
            ),
            (
                "DELETE FROM grade_topics
                 WHERE structure_id IN (SELECT id FROM grade_structures WHERE subject_id = ?)",
                "grade_topics",
            ),
            (
                "DELETE FROM grade_structures WHERE subject_id = ?",
                "grade_structures",
            ),
            (
                "DELETE FROM schedule_slots WHERE subject_id = ?",
                "schedule_slots",
            ),
            ("DELETE FROM subjects WHERE id = ?", "subjects"),
        ],
        TrashKind::Class => vec![
            (
                "DELETE FROM grade_scores
                 WHERE column_id IN (
                   SELECT c.id FROM grade_columns c
                   JOIN grade_structures gs ON gs.id = c.structure_id
                   WHERE gs.class_id = ?
                 )",
                "grade_scores",
            ),
            (
                "DELETE FROM grade_columns
                 WHERE structure_id IN (SELECT id FROM grade_structures WHERE class_id = ?)",
                "grade_columns",
            ),
            (
                "DELETE FROM grade_topics
                 WHERE structure_id IN (SELECT id FROM grade_structures WHERE class_id = ?)",
                "grade_topics",
            ),
            (
                "DELETE FROM grade_structures WHERE class_id = ?",
                "grade_structures",
            ),
            (
                "DELETE FROM schedule_slots WHERE class_id = ?",
                "schedule_slots",
            ),
            ("DELETE FROM students WHERE class_id = ?", "students"),
            ("DELETE FROM classes WHERE id = ?", "classes"),
        ],
        TrashKind::Student => vec![
            (
                "DELETE FROM grade_scores WHERE student_id = ?",
                "grade_scores",
            ),
            ("DELETE FROM students WHERE id = ?", "students"),
        ],
        TrashKind::GalleryItem => {
            vec![("DELETE FROM gallery_items WHERE id = ?", "gallery_items")]
        }
    };

    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "trash.list" => Some(handle_trash_list(state, req)),
        "trash.restore" => Some(handle_trash_restore(state, req)),
        "trash.purge" => Some(handle_trash_purge(state, req)),
        _ => None,
    }
}
