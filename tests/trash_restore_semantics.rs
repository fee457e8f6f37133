use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_siakadd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn siakadd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn trash_ids(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    kind: &str,
) -> Vec<String> {
    let trash = request_ok(stdin, reader, id, "trash.list", json!({}));
    trash
        .get("items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|i| i.get("kind").and_then(|v| v.as_str()) == Some(kind))
                .filter_map(|i| i.get("id").and_then(|v| v.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn soft_delete_restore_and_purge_cascade() {
    let workspace = temp_dir("siakad-trash");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "9C" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "name": "Bahasa Indonesia" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "classId": class_id, "fullName": "Citra Lestari" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.upsertSlot",
        json!({
            "classId": class_id,
            "day": "kamis",
            "startTime": "08:00",
            "endTime": "09:00",
            "kind": "lesson",
            "subjectId": subject_id
        }),
    );
    let structure = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.structureSave",
        json!({
            "classId": class_id,
            "subjectId": subject_id,
            "topics": [{ "name": "Puisi", "formatif": [{ "label": "F1" }] }]
        }),
    );
    let column_id = structure
        .pointer("/topics/0/formatif/0/id")
        .and_then(|v| v.as_str())
        .expect("column id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "grades.setScore",
        json!({ "columnId": column_id, "studentId": student_id, "value": 80.0 }),
    );

    // Soft-deleted subject leaves listings but shows up in trash.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.delete",
        json!({ "subjectId": subject_id }),
    );
    let subjects = request_ok(&mut stdin, &mut reader, "9", "subjects.list", json!({}));
    assert_eq!(
        subjects
            .get("subjects")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(0)
    );
    assert_eq!(trash_ids(&mut stdin, &mut reader, "10", "subject").len(), 1);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "trash.restore",
        json!({ "kind": "subject", "id": subject_id }),
    );
    let subjects = request_ok(&mut stdin, &mut reader, "12", "subjects.list", json!({}));
    assert_eq!(
        subjects
            .get("subjects")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(1)
    );

    // A student cannot come back while its class is in the trash.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "classes.delete",
        json!({ "classId": class_id }),
    );
    let listing = request(
        &mut stdin,
        &mut reader,
        "15",
        "students.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(listing.get("ok").and_then(|v| v.as_bool()), Some(false));

    let blocked = request(
        &mut stdin,
        &mut reader,
        "16",
        "trash.restore",
        json!({ "kind": "student", "id": student_id }),
    );
    assert_eq!(blocked.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        blocked.pointer("/error/code").and_then(|v| v.as_str()),
        Some("parent_deleted")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "trash.restore",
        json!({ "kind": "class", "id": class_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "trash.restore",
        json!({ "kind": "student", "id": student_id }),
    );
    let students = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "students.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        students
            .get("students")
            .and_then(|v| v.as_array())
            .map(Vec::len),
        Some(1)
    );

    // Purging the class takes its slots, rubric and students with it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "classes.delete",
        json!({ "classId": class_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "trash.purge",
        json!({ "kind": "class", "id": class_id }),
    );
    assert_eq!(trash_ids(&mut stdin, &mut reader, "22", "class").len(), 0);
    let gone = request(
        &mut stdin,
        &mut reader,
        "23",
        "grades.scoresGet",
        json!({ "classId": class_id, "subjectId": subject_id }),
    );
    assert_eq!(gone.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        gone.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    // Purge only accepts items that are actually in the trash.
    let live_subject = request(
        &mut stdin,
        &mut reader,
        "24",
        "trash.purge",
        json!({ "kind": "subject", "id": subject_id }),
    );
    assert_eq!(live_subject.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        live_subject.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_found")
    );

    drop(stdin);
    let _ = child.wait();
}
