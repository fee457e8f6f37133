use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "siakad.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT,
            deleted_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            homeroom_teacher TEXT,
            deleted_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            full_name TEXT NOT NULL,
            student_no TEXT,
            sort_order INTEGER NOT NULL,
            deleted_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_slots(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            day TEXT NOT NULL,
            start_minutes INTEGER NOT NULL,
            end_minutes INTEGER NOT NULL,
            kind TEXT NOT NULL,
            subject_id TEXT,
            label TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_slots_class ON schedule_slots(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_slots_class_day ON schedule_slots(class_id, day)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_structures(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(class_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_structures_class ON grade_structures(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_topics(
            id TEXT PRIMARY KEY,
            structure_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(structure_id) REFERENCES grade_structures(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_topics_structure ON grade_topics(structure_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_columns(
            id TEXT PRIMARY KEY,
            structure_id TEXT NOT NULL,
            topic_id TEXT,
            kind TEXT NOT NULL,
            label TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(structure_id) REFERENCES grade_structures(id),
            FOREIGN KEY(topic_id) REFERENCES grade_topics(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_columns_structure ON grade_columns(structure_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_columns_topic ON grade_columns(topic_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_scores(
            id TEXT PRIMARY KEY,
            column_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            value REAL,
            updated_at TEXT,
            FOREIGN KEY(column_id) REFERENCES grade_columns(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(column_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_scores_column ON grade_scores(column_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_scores_student ON grade_scores(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS gallery_items(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            file_name TEXT NOT NULL,
            checksum TEXT,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )",
        [],
    )?;

    // Early cache files predate the checksum column and slot ordering.
    ensure_gallery_items_checksum(&conn)?;
    ensure_schedule_slots_sort_order(&conn)?;

    Ok(conn)
}

fn ensure_gallery_items_checksum(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "gallery_items", "checksum")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE gallery_items ADD COLUMN checksum TEXT", [])?;
    Ok(())
}

fn ensure_schedule_slots_sort_order(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "schedule_slots", "sort_order")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE schedule_slots ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
        [],
    )?;

    // Backfill per (class, day) using start time as a best-effort order.
    let mut key_stmt =
        conn.prepare("SELECT DISTINCT class_id, day FROM schedule_slots ORDER BY class_id, day")?;
    let keys = key_stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut slot_stmt = conn.prepare(
        "SELECT id FROM schedule_slots WHERE class_id = ? AND day = ? ORDER BY start_minutes",
    )?;
    for (class_id, day) in keys {
        let slot_ids = slot_stmt
            .query_map((&class_id, &day), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for (i, sid) in slot_ids.iter().enumerate() {
            conn.execute(
                "UPDATE schedule_slots SET sort_order = ? WHERE id = ?",
                (i as i64, sid),
            )?;
        }
    }

    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &text),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
    Ok(())
}
