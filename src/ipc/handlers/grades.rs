use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

const STRUCTURE_MAX_TOPICS: usize = 64;
const STRUCTURE_MAX_COLUMNS_PER_TOPIC: usize = 32;
const BULK_SET_SCORES_MAX_EDITS: usize = 5000;

const COLUMN_FORMATIF: &str = "formatif";
const COLUMN_UTS: &str = "uts";
const COLUMN_UAS: &str = "uas";

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn class_and_subject_exist(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> Result<(), HandlerErr> {
    let class: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classes WHERE id = ? AND deleted_at IS NULL",
            [class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if class.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }
    let subject: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ? AND deleted_at IS NULL",
            [subject_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if subject.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "subject not found".to_string(),
            details: None,
        });
    }
    Ok(())
}

fn id_set(conn: &Connection, sql: &str, param: &str) -> Result<HashSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([param], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn find_structure_id(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM grade_structures WHERE class_id = ? AND subject_id = ?",
        (class_id, subject_id),
        |r| r.get(0),
    )
    .optional()
    .map_err(db_err)
}

/// Full structure as the UI consumes it: ordered topics with their
/// formative columns, then the two fixed summative columns.
fn structure_json(conn: &Connection, structure_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let mut topic_stmt = conn
        .prepare("SELECT id, name FROM grade_topics WHERE structure_id = ? ORDER BY sort_order")
        .map_err(db_err)?;
    let topics = topic_stmt
        .query_map([structure_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut col_stmt = conn
        .prepare(
            "SELECT id, topic_id, kind, label FROM grade_columns
             WHERE structure_id = ? ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let columns = col_stmt
        .query_map([structure_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut by_topic: HashMap<&str, Vec<serde_json::Value>> = HashMap::new();
    let mut fixed: Vec<serde_json::Value> = Vec::new();
    for (id, topic_id, kind, label) in &columns {
        match topic_id {
            Some(tid) if kind == COLUMN_FORMATIF => {
                by_topic
                    .entry(tid.as_str())
                    .or_default()
                    .push(json!({ "id": id, "label": label }));
            }
            _ => fixed.push(json!({ "id": id, "kind": kind, "label": label })),
        }
    }

    let topics_out: Vec<serde_json::Value> = topics
        .iter()
        .map(|(id, name)| {
            json!({
                "id": id,
                "name": name,
                "formatif": by_topic.remove(id.as_str()).unwrap_or_default(),
            })
        })
        .collect();

    Ok(json!({
        "structureId": structure_id,
        "topics": topics_out,
        "fixed": fixed,
    }))
}

fn handle_structure_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    if let Err(e) = class_and_subject_exist(conn, &class_id, &subject_id) {
        return e.response(&req.id);
    }

    match find_structure_id(conn, &class_id, &subject_id) {
        Ok(Some(structure_id)) => match structure_json(conn, &structure_id) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        },
        Ok(None) => ok(
            &req.id,
            json!({ "structureId": null, "topics": [], "fixed": [] }),
        ),
        Err(e) => e.response(&req.id),
    }
}

struct TopicPayload {
    id: Option<String>,
    name: String,
    formatif: Vec<ColumnPayload>,
}

struct ColumnPayload {
    id: Option<String>,
    label: String,
}

fn parse_topics_payload(req: &Request) -> Result<Vec<TopicPayload>, HandlerErr> {
    let bad = |message: String| HandlerErr {
        code: "bad_params",
        message,
        details: None,
    };

    let Some(raw_topics) = req.params.get("topics").and_then(|v| v.as_array()) else {
        return Err(bad("missing topics[]".to_string()));
    };
    if raw_topics.len() > STRUCTURE_MAX_TOPICS {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!(
                "too many topics: {} > {}",
                raw_topics.len(),
                STRUCTURE_MAX_TOPICS
            ),
            details: None,
        });
    }

    let mut topics = Vec::with_capacity(raw_topics.len());
    for (i, raw) in raw_topics.iter().enumerate() {
        let Some(obj) = raw.as_object() else {
            return Err(bad(format!("topic at index {} must be an object", i)));
        };
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| bad(format!("topic at index {} missing name", i)))?;

        let raw_cols = obj
            .get("formatif")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if raw_cols.len() > STRUCTURE_MAX_COLUMNS_PER_TOPIC {
            return Err(bad(format!(
                "too many formatif columns in topic {:?}: {} > {}",
                name,
                raw_cols.len(),
                STRUCTURE_MAX_COLUMNS_PER_TOPIC
            )));
        }

        let mut formatif = Vec::with_capacity(raw_cols.len());
        for (j, raw_col) in raw_cols.iter().enumerate() {
            let Some(col_obj) = raw_col.as_object() else {
                return Err(bad(format!(
                    "formatif column {} of topic {:?} must be an object",
                    j, name
                )));
            };
            let col_id = col_obj
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let label = col_obj
                .get("label")
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    bad(format!(
                        "formatif column {} of topic {:?} missing label",
                        j, name
                    ))
                })?;
            formatif.push(ColumnPayload { id: col_id, label });
        }

        topics.push(TopicPayload { id, name, formatif });
    }

    Ok(topics)
}

fn handle_structure_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    if let Err(e) = class_and_subject_exist(conn, &class_id, &subject_id) {
        return e.response(&req.id);
    }
    let topics = match parse_topics_payload(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Find or create the structure. The fixed summative columns are born
    // with it and never touched by saves.
    let structure_id = match tx
        .query_row(
            "SELECT id FROM grade_structures WHERE class_id = ? AND subject_id = ?",
            (&class_id, &subject_id),
            |r| r.get::<_, String>(0),
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => {
            let new_id = Uuid::new_v4().to_string();
            let created_at = chrono::Utc::now().to_rfc3339();
            if let Err(e) = tx.execute(
                "INSERT INTO grade_structures(id, class_id, subject_id, created_at)
                 VALUES(?, ?, ?, ?)",
                (&new_id, &class_id, &subject_id, &created_at),
            ) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "grade_structures" })),
                );
            }
            for (sort_order, (kind, label)) in
                [(COLUMN_UTS, "UTS"), (COLUMN_UAS, "UAS")].iter().enumerate()
            {
                if let Err(e) = tx.execute(
                    "INSERT INTO grade_columns(id, structure_id, topic_id, kind, label, sort_order)
                     VALUES(?, ?, NULL, ?, ?, ?)",
                    (
                        &Uuid::new_v4().to_string(),
                        &new_id,
                        kind,
                        label,
                        sort_order as i64,
                    ),
                ) {
                    let _ = tx.rollback();
                    return err(
                        &req.id,
                        "db_insert_failed",
                        e.to_string(),
                        Some(json!({ "table": "grade_columns" })),
                    );
                }
            }
            new_id
        }
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };

    let existing_topics = match id_set(
        &tx,
        "SELECT id FROM grade_topics WHERE structure_id = ?",
        &structure_id,
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    let existing_columns = match id_set(
        &tx,
        "SELECT id FROM grade_columns WHERE structure_id = ? AND kind = 'formatif'",
        &structure_id,
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };

    let mut kept_topics: HashSet<String> = HashSet::new();
    let mut kept_columns: HashSet<String> = HashSet::new();

    for (i, topic) in topics.iter().enumerate() {
        let topic_id = match &topic.id {
            Some(id) => {
                if !existing_topics.contains(id) {
                    let _ = tx.rollback();
                    return err(
                        &req.id,
                        "not_found",
                        "topic not found in structure",
                        Some(json!({ "topicId": id })),
                    );
                }
                if let Err(e) = tx.execute(
                    "UPDATE grade_topics SET name = ?, sort_order = ? WHERE id = ?",
                    (&topic.name, i as i64, id),
                ) {
                    let _ = tx.rollback();
                    return err(&req.id, "db_update_failed", e.to_string(), None);
                }
                id.clone()
            }
            None => {
                let new_id = Uuid::new_v4().to_string();
                if let Err(e) = tx.execute(
                    "INSERT INTO grade_topics(id, structure_id, name, sort_order)
                     VALUES(?, ?, ?, ?)",
                    (&new_id, &structure_id, &topic.name, i as i64),
                ) {
                    let _ = tx.rollback();
                    return err(
                        &req.id,
                        "db_insert_failed",
                        e.to_string(),
                        Some(json!({ "table": "grade_topics" })),
                    );
                }
                new_id
            }
        };
        kept_topics.insert(topic_id.clone());

        for (j, col) in topic.formatif.iter().enumerate() {
            let column_id = match &col.id {
                Some(id) => {
                    if !existing_columns.contains(id) {
                        let _ = tx.rollback();
                        return err(
                            &req.id,
                            "not_found",
                            "column not found in structure",
                            Some(json!({ "columnId": id })),
                        );
                    }
                    if let Err(e) = tx.execute(
                        "UPDATE grade_columns SET topic_id = ?, label = ?, sort_order = ?
                         WHERE id = ?",
                        (&topic_id, &col.label, j as i64, id),
                    ) {
                        let _ = tx.rollback();
                        return err(&req.id, "db_update_failed", e.to_string(), None);
                    }
                    id.clone()
                }
                None => {
                    let new_id = Uuid::new_v4().to_string();
                    if let Err(e) = tx.execute(
                        "INSERT INTO grade_columns(id, structure_id, topic_id, kind, label, sort_order)
                         VALUES(?, ?, ?, 'formatif', ?, ?)",
                        (&new_id, &structure_id, &topic_id, &col.label, j as i64),
                    ) {
                        let _ = tx.rollback();
                        return err(
                            &req.id,
                            "db_insert_failed",
                            e.to_string(),
                            Some(json!({ "table": "grade_columns" })),
                        );
                    }
                    new_id
                }
            };
            kept_columns.insert(column_id);
        }
    }

    // Dropped columns lose their scores with them; dropped topics follow
    // once their columns are gone.
    for column_id in existing_columns.difference(&kept_columns) {
        if let Err(e) = tx.execute("DELETE FROM grade_scores WHERE column_id = ?", [column_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "grade_scores" })),
            );
        }
        if let Err(e) = tx.execute("DELETE FROM grade_columns WHERE id = ?", [column_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "grade_columns" })),
            );
        }
    }
    for topic_id in existing_topics.difference(&kept_topics) {
        if let Err(e) = tx.execute("DELETE FROM grade_topics WHERE id = ?", [topic_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "grade_topics" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    match structure_json(conn, &structure_id) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

struct ColumnRef {
    id: String,
    kind: String,
    label: String,
    topic_id: Option<String>,
    topic_name: Option<String>,
}

/// Columns in display order: each topic's formative columns first, then
/// the fixed summative pair.
fn ordered_columns(conn: &Connection, structure_id: &str) -> Result<Vec<ColumnRef>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.kind, c.label, c.topic_id, t.name
             FROM grade_columns c
             LEFT JOIN grade_topics t ON t.id = c.topic_id
             WHERE c.structure_id = ?
             ORDER BY
               CASE WHEN c.topic_id IS NULL THEN 1 ELSE 0 END,
               t.sort_order,
               c.sort_order",
        )
        .map_err(db_err)?;
    stmt.query_map([structure_id], |row| {
        Ok(ColumnRef {
            id: row.get(0)?,
            kind: row.get(1)?,
            label: row.get(2)?,
            topic_id: row.get(3)?,
            topic_name: row.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn handle_scores_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    if let Err(e) = class_and_subject_exist(conn, &class_id, &subject_id) {
        return e.response(&req.id);
    }

    let structure_id = match find_structure_id(conn, &class_id, &subject_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "grade structure not defined", None),
        Err(e) => return e.response(&req.id),
    };

    let columns = match ordered_columns(conn, &structure_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut student_stmt = match conn.prepare(
        "SELECT id, full_name FROM students
         WHERE class_id = ? AND deleted_at IS NULL
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match student_stmt
        .query_map([&class_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut score_stmt = match conn.prepare(
        "SELECT s.column_id, s.student_id, s.value
         FROM grade_scores s
         JOIN grade_columns c ON c.id = s.column_id
         WHERE c.structure_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let score_rows = match score_stmt
        .query_map([&structure_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<f64>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut scores: HashMap<(String, String), Option<f64>> = HashMap::new();
    for (column_id, student_id, value) in score_rows {
        scores.insert((column_id, student_id), value);
    }

    let columns_out: Vec<serde_json::Value> = columns
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "kind": c.kind,
                "label": c.label,
                "topicId": c.topic_id,
                "topicName": c.topic_name,
            })
        })
        .collect();

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|(student_id, full_name)| {
            let values: Vec<serde_json::Value> = columns
                .iter()
                .map(|c| {
                    match scores
                        .get(&(c.id.clone(), student_id.clone()))
                        .copied()
                        .flatten()
                    {
                        Some(v) => json!(v),
                        None => json!(null),
                    }
                })
                .collect();
            json!({
                "studentId": student_id,
                "fullName": full_name,
                "values": values,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "structureId": structure_id,
            "columns": columns_out,
            "rows": rows,
        }),
    )
}

/// A score is either a number in 0..=100 or null (clears the cell).
/// Averaging over these cells is the backend's job; nothing here computes
/// one.
fn resolve_score_value(raw: Option<&serde_json::Value>) -> Result<Option<f64>, HandlerErr> {
    match raw {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(num) = v.as_f64() else {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: "value must be a number or null".to_string(),
                    details: None,
                });
            };
            if !(0.0..=100.0).contains(&num) {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: "value must be between 0 and 100".to_string(),
                    details: Some(json!({ "value": num })),
                });
            }
            Ok(Some(num))
        }
    }
}

struct ScoreTarget {
    column_id: String,
    student_id: String,
}

fn resolve_score_target(
    conn: &Connection,
    column_id: &str,
    student_id: &str,
) -> Result<ScoreTarget, HandlerErr> {
    let class_id: Option<String> = conn
        .query_row(
            "SELECT gs.class_id FROM grade_columns c
             JOIN grade_structures gs ON gs.id = c.structure_id
             WHERE c.id = ?",
            [column_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr {
            code: "not_found",
            message: "column not found".to_string(),
            details: Some(json!({ "columnId": column_id })),
        });
    };

    let in_class: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ? AND deleted_at IS NULL",
            (student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if in_class.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not in class".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }

    Ok(ScoreTarget {
        column_id: column_id.to_string(),
        student_id: student_id.to_string(),
    })
}

fn write_score(
    conn: &Connection,
    target: &ScoreTarget,
    value: Option<f64>,
) -> Result<(), HandlerErr> {
    match value {
        Some(v) => {
            let score_id = Uuid::new_v4().to_string();
            let updated_at = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO grade_scores(id, column_id, student_id, value, updated_at)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(column_id, student_id) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                (
                    &score_id,
                    &target.column_id,
                    &target.student_id,
                    v,
                    &updated_at,
                ),
            )
            .map_err(|e| HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "grade_scores" })),
            })?;
        }
        None => {
            conn.execute(
                "DELETE FROM grade_scores WHERE column_id = ? AND student_id = ?",
                (&target.column_id, &target.student_id),
            )
            .map_err(|e| HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "grade_scores" })),
            })?;
        }
    }
    Ok(())
}

fn handle_set_score(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let column_id = match req.params.get("columnId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing columnId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let value = match resolve_score_value(req.params.get("value")) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let target = match resolve_score_target(conn, &column_id, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = write_score(conn, &target, value) {
        return e.response(&req.id);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_bulk_set_scores(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let Some(edits_arr) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing edits[]", None);
    };

    if edits_arr.len() > BULK_SET_SCORES_MAX_EDITS {
        let rejected = edits_arr.len();
        return ok(
            &req.id,
            json!({
                "ok": true,
                "updated": 0,
                "rejected": rejected,
                "limitExceeded": true,
                "errors": [{
                    "index": -1,
                    "code": "too_many_edits",
                    "message": format!(
                        "bulk payload exceeds max edits: {} > {}",
                        rejected, BULK_SET_SCORES_MAX_EDITS
                    )
                }]
            }),
        );
    }

    if let Err(e) = class_and_subject_exist(conn, &class_id, &subject_id) {
        return e.response(&req.id);
    }
    let structure_id = match find_structure_id(conn, &class_id, &subject_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "grade structure not defined", None),
        Err(e) => return e.response(&req.id),
    };

    let structure_columns = match id_set(
        conn,
        "SELECT id FROM grade_columns WHERE structure_id = ?",
        &structure_id,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut updated: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, edit) in edits_arr.iter().enumerate() {
        let Some(obj) = edit.as_object() else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("edit at index {} must be an object", i),
            }));
            continue;
        };

        let Some(column_id) = obj.get("columnId").and_then(|v| v.as_str()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("edit at index {} missing columnId", i),
            }));
            continue;
        };
        let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("edit at index {} missing studentId", i),
            }));
            continue;
        };

        if !structure_columns.contains(column_id) {
            errors.push(json!({
                "index": i,
                "columnId": column_id,
                "code": "not_found",
                "message": "column not in structure",
            }));
            continue;
        }

        let value = match resolve_score_value(obj.get("value")) {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({
                    "index": i,
                    "columnId": column_id,
                    "studentId": student_id,
                    "code": e.code,
                    "message": e.message,
                }));
                continue;
            }
        };

        let target = match resolve_score_target(conn, column_id, student_id) {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({
                    "index": i,
                    "columnId": column_id,
                    "studentId": student_id,
                    "code": e.code,
                    "message": e.message,
                }));
                continue;
            }
        };

        match write_score(conn, &target, value) {
            Ok(()) => updated += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "columnId": column_id,
                "studentId": student_id,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    let rejected = errors.len();
    let mut result = json!({ "ok": true, "updated": updated });
    if rejected > 0 {
        if let Some(obj) = result.as_object_mut() {
            obj.insert("rejected".into(), json!(rejected));
            obj.insert("errors".into(), json!(errors));
        }
    }

    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.structureGet" => Some(handle_structure_get(state, req)),
        "grades.structureSave" => Some(handle_structure_save(state, req)),
        "grades.scoresGet" => Some(handle_scores_get(state, req)),
        "grades.setScore" => Some(handle_set_score(state, req)),
        "grades.bulkSetScores" => Some(handle_bulk_set_scores(state, req)),
        _ => None,
    }
}
