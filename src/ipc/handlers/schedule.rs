use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    compact_week, validate_day_slots, SlotKind, TimeOfDay, TimeRow, TimeSlot, WeekDay,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

struct StoredSlot {
    id: String,
    slot: TimeSlot,
    subject_id: Option<String>,
}

/// Loads a class's slots with their subject names resolved. Rows that fail
/// to convert are data-integrity defects (the write path validates), so
/// they surface as errors rather than being skipped.
fn load_class_slots(conn: &Connection, class_id: &str) -> Result<Vec<StoredSlot>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT sl.id, sl.day, sl.start_minutes, sl.end_minutes, sl.kind, sl.label,
                    sl.sort_order, sl.subject_id, sub.name, sub.code
             FROM schedule_slots sl
             LEFT JOIN subjects sub ON sub.id = sl.subject_id
             WHERE sl.class_id = ?
             ORDER BY sl.day, sl.start_minutes, sl.sort_order",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    let raw = stmt
        .query_map([class_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    let mut out = Vec::with_capacity(raw.len());
    for (id, day, start_min, end_min, kind, label, sort_order, subject_id, subject_name, code) in
        raw
    {
        let defect = |message: String| HandlerErr {
            code: "invalid_schedule",
            message,
            details: Some(json!({ "slotId": id.clone() })),
        };

        let Some(day) = WeekDay::parse(&day) else {
            return Err(defect(format!("stored slot has unknown day {:?}", day)));
        };
        let start_time = u16::try_from(start_min)
            .ok()
            .and_then(TimeOfDay::from_minutes)
            .ok_or_else(|| defect(format!("stored slot start out of range: {}", start_min)))?;
        let end_time = u16::try_from(end_min)
            .ok()
            .and_then(TimeOfDay::from_minutes)
            .ok_or_else(|| defect(format!("stored slot end out of range: {}", end_min)))?;

        let slot_kind = match kind.as_str() {
            "lesson" => {
                let Some(subject) = subject_name else {
                    return Err(defect("stored lesson has no subject".to_string()));
                };
                SlotKind::Lesson { subject, code }
            }
            "break" => {
                let Some(label) = label else {
                    return Err(defect("stored break has no label".to_string()));
                };
                SlotKind::Break { label }
            }
            other => return Err(defect(format!("stored slot has unknown kind {:?}", other))),
        };

        out.push(StoredSlot {
            id,
            slot: TimeSlot {
                day,
                start_time,
                end_time,
                kind: slot_kind,
                sort_order,
            },
            subject_id,
        });
    }

    Ok(out)
}

fn class_name(conn: &Connection, class_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT name FROM classes WHERE id = ? AND deleted_at IS NULL",
        [class_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn slot_json(stored: &StoredSlot) -> serde_json::Value {
    let slot = &stored.slot;
    let mut value = json!({
        "id": stored.id,
        "day": slot.day.as_str(),
        "startTime": slot.start_time.to_string(),
        "endTime": slot.end_time.to_string(),
        "sortOrder": slot.sort_order,
    });
    match &slot.kind {
        SlotKind::Lesson { subject, code } => {
            value["kind"] = json!("lesson");
            value["subjectId"] = json!(stored.subject_id);
            value["subject"] = json!(subject);
            value["code"] = json!(code);
        }
        SlotKind::Break { label } => {
            value["kind"] = json!("break");
            value["label"] = json!(label);
        }
    }
    value
}

fn handle_list_slots(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    match class_name(conn, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return e.response(&req.id),
    }

    let stored = match load_class_slots(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let slots: Vec<serde_json::Value> = stored.iter().map(slot_json).collect();

    ok(&req.id, json!({ "slots": slots }))
}

fn handle_upsert_slot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    match class_name(conn, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return e.response(&req.id),
    }

    let slot_id = req
        .params
        .get("slotId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let day = match req
        .params
        .get("day")
        .and_then(|v| v.as_str())
        .and_then(WeekDay::parse)
    {
        Some(v) => v,
        None => {
            return err(
                &req.id,
                "bad_params",
                "day must be one of senin..sabtu",
                None,
            )
        }
    };

    let start_time = match req.params.get("startTime").and_then(|v| v.as_str()) {
        Some(raw) => match TimeOfDay::parse(raw) {
            Ok(v) => v,
            Err(e) => return err(&req.id, &e.code, e.message, e.details),
        },
        None => return err(&req.id, "bad_params", "missing startTime", None),
    };
    let end_time = match req.params.get("endTime").and_then(|v| v.as_str()) {
        Some(raw) => match TimeOfDay::parse(raw) {
            Ok(v) => v,
            Err(e) => return err(&req.id, &e.code, e.message, e.details),
        },
        None => return err(&req.id, "bad_params", "missing endTime", None),
    };

    let kind_raw = match req.params.get("kind").and_then(|v| v.as_str()) {
        Some(v) => v.to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing kind", None),
    };

    let (kind, subject_id, label) = match kind_raw.as_str() {
        "lesson" => {
            let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
                Some(v) => v.to_string(),
                None => return err(&req.id, "bad_params", "lesson requires subjectId", None),
            };
            let subject: Option<(String, Option<String>)> = match conn
                .query_row(
                    "SELECT name, code FROM subjects WHERE id = ? AND deleted_at IS NULL",
                    [&subject_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let Some((subject_name, code)) = subject else {
                return err(&req.id, "not_found", "subject not found", None);
            };
            (
                SlotKind::Lesson {
                    subject: subject_name,
                    code,
                },
                Some(subject_id),
                None,
            )
        }
        "break" => {
            let label = match req.params.get("label").and_then(|v| v.as_str()) {
                Some(v) if !v.trim().is_empty() => v.trim().to_string(),
                _ => return err(&req.id, "bad_params", "break requires label", None),
            };
            (
                SlotKind::Break {
                    label: label.clone(),
                },
                None,
                Some(label),
            )
        }
        other => {
            return err(
                &req.id,
                "bad_params",
                "kind must be lesson or break",
                Some(json!({ "kind": other })),
            )
        }
    };

    // Validate the candidate against the rest of its day before writing.
    let stored = match load_class_slots(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Some(update_id) = &slot_id {
        if !stored.iter().any(|s| &s.id == update_id) {
            return err(&req.id, "not_found", "slot not found", None);
        }
    }

    let mut day_slots: Vec<TimeSlot> = stored
        .iter()
        .filter(|s| s.slot.day == day && Some(&s.id) != slot_id.as_ref())
        .map(|s| s.slot.clone())
        .collect();
    day_slots.push(TimeSlot {
        day,
        start_time,
        end_time,
        kind,
        sort_order: 0,
    });
    if let Err(e) = validate_day_slots(&day_slots) {
        return err(&req.id, &e.code, e.message, e.details);
    }

    let resolved_id = match &slot_id {
        Some(existing) => {
            if let Err(e) = conn.execute(
                "UPDATE schedule_slots
                 SET day = ?, start_minutes = ?, end_minutes = ?, kind = ?, subject_id = ?, label = ?
                 WHERE id = ? AND class_id = ?",
                (
                    day.as_str(),
                    i64::from(start_time.minutes()),
                    i64::from(end_time.minutes()),
                    &kind_raw,
                    &subject_id,
                    &label,
                    existing,
                    &class_id,
                ),
            ) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
            existing.clone()
        }
        None => {
            let sort_order: i64 = match conn.query_row(
                "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM schedule_slots
                 WHERE class_id = ? AND day = ?",
                (&class_id, day.as_str()),
                |r| r.get(0),
            ) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let new_id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO schedule_slots(id, class_id, day, start_minutes, end_minutes,
                                            kind, subject_id, label, sort_order)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &new_id,
                    &class_id,
                    day.as_str(),
                    i64::from(start_time.minutes()),
                    i64::from(end_time.minutes()),
                    &kind_raw,
                    &subject_id,
                    &label,
                    sort_order,
                ),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "schedule_slots" })),
                );
            }
            new_id
        }
    };

    ok(&req.id, json!({ "slotId": resolved_id }))
}

fn handle_delete_slot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let slot_id = match req.params.get("slotId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing slotId", None),
    };

    let deleted = match conn.execute(
        "DELETE FROM schedule_slots WHERE id = ? AND class_id = ?",
        (&slot_id, &class_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "slot not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    match class_name(conn, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return e.response(&req.id),
    }

    let stored = match load_class_slots(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let slots: Vec<TimeSlot> = stored.into_iter().map(|s| s.slot).collect();
    let rows = compact_week(&slots);

    let days: Vec<&str> = WeekDay::ALL.iter().map(|d| d.as_str()).collect();
    ok(&req.id, json!({ "days": days, "rows": rows }))
}

fn handle_print_html(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let name = match class_name(conn, &class_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return e.response(&req.id),
    };

    let stored = match load_class_slots(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let slots: Vec<TimeSlot> = stored.into_iter().map(|s| s.slot).collect();
    let rows = compact_week(&slots);

    ok(&req.id, json!({ "html": render_grid_html(&name, &rows) }))
}

fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders the compacted grid to a printable table fragment. A cell that
/// starts a slot carries its rowspan; continuation cells are not emitted
/// at all, their space is covered by the starting row.
fn render_grid_html(class_name: &str, rows: &[TimeRow]) -> String {
    let mut html = String::new();
    html.push_str(&format!(
        "<h2>Jadwal Pelajaran {}</h2>\n",
        html_escape(class_name)
    ));

    if rows.is_empty() {
        html.push_str("<p class=\"empty\">Belum ada jadwal.</p>\n");
        return html;
    }

    html.push_str("<table class=\"jadwal\">\n<thead>\n<tr><th>Jam</th>");
    for day in WeekDay::ALL {
        html.push_str(&format!("<th>{}</th>", day.display_name()));
    }
    html.push_str("</tr>\n</thead>\n<tbody>\n");

    for row in rows {
        html.push_str(&format!("<tr><td>{}</td>", html_escape(&row.label)));
        for day in WeekDay::ALL {
            match row.cells.get(&day) {
                None => html.push_str("<td></td>"),
                Some(cell) if cell.is_continuation => {}
                Some(cell) => {
                    let text = match &cell.slot.kind {
                        SlotKind::Lesson {
                            subject,
                            code: Some(code),
                        } => format!("{} ({})", html_escape(subject), html_escape(code)),
                        SlotKind::Lesson {
                            subject,
                            code: None,
                        } => html_escape(subject),
                        SlotKind::Break { label } => {
                            format!("<em>{}</em>", html_escape(label))
                        }
                    };
                    if cell.row_span > 1 {
                        html.push_str(&format!("<td rowspan=\"{}\">{}</td>", cell.row_span, text));
                    } else {
                        html.push_str(&format!("<td>{}</td>", text));
                    }
                }
            }
        }
        html.push_str("</tr>\n");
    }

    html.push_str("</tbody>\n</table>\n");
    html
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.listSlots" => Some(handle_list_slots(state, req)),
        "schedule.upsertSlot" => Some(handle_upsert_slot(state, req)),
        "schedule.deleteSlot" => Some(handle_delete_slot(state, req)),
        "schedule.grid" => Some(handle_grid(state, req)),
        "schedule.printHtml" => Some(handle_print_html(state, req)),
        _ => None,
    }
}
