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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

struct Fixture {
    class_id: String,
    matematika_id: String,
    ipa_id: String,
}

fn setup(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "s2",
        "classes.create",
        json!({ "name": "7A" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let matematika = request_ok(
        stdin,
        reader,
        "s3",
        "subjects.create",
        json!({ "name": "Matematika" }),
    );
    let matematika_id = matematika
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    let ipa = request_ok(
        stdin,
        reader,
        "s4",
        "subjects.create",
        json!({ "name": "IPA", "code": "IPA7" }),
    );
    let ipa_id = ipa
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();
    Fixture {
        class_id,
        matematika_id,
        ipa_id,
    }
}

#[test]
fn grid_merges_boundaries_across_days_with_rowspans() {
    let workspace = temp_dir("siakad-grid-merge");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    // Monday: lesson then break. Tuesday: one double-length lesson.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "senin",
            "startTime": "07:00",
            "endTime": "07:45",
            "kind": "lesson",
            "subjectId": fx.matematika_id
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "senin",
            "startTime": "07:45",
            "endTime": "08:30",
            "kind": "break",
            "label": "Istirahat"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "selasa",
            "startTime": "07:00",
            "endTime": "08:30",
            "kind": "lesson",
            "subjectId": fx.ipa_id
        }),
    );

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.grid",
        json!({ "classId": fx.class_id }),
    );
    let rows = grid.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].get("label").and_then(|v| v.as_str()), Some("07:00-07:45"));
    assert_eq!(rows[1].get("label").and_then(|v| v.as_str()), Some("07:45-08:30"));

    let row0 = rows[0].get("cells").expect("row0 cells");
    let senin0 = row0.get("senin").expect("senin cell");
    assert_eq!(senin0.get("rowSpan").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        senin0.get("isContinuation").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        senin0
            .pointer("/slot/subject")
            .and_then(|v| v.as_str()),
        Some("Matematika")
    );

    let selasa0 = row0.get("selasa").expect("selasa cell");
    assert_eq!(selasa0.get("rowSpan").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        selasa0.get("isContinuation").and_then(|v| v.as_bool()),
        Some(false)
    );

    let row1 = rows[1].get("cells").expect("row1 cells");
    let senin1 = row1.get("senin").expect("senin break cell");
    assert_eq!(
        senin1.pointer("/slot/kind").and_then(|v| v.as_str()),
        Some("break")
    );
    assert_eq!(
        senin1.pointer("/slot/label").and_then(|v| v.as_str()),
        Some("Istirahat")
    );
    let selasa1 = row1.get("selasa").expect("selasa continuation cell");
    assert_eq!(
        selasa1.get("isContinuation").and_then(|v| v.as_bool()),
        Some(true)
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn upsert_rejects_overlap_duplicate_start_and_bad_times() {
    let workspace = temp_dir("siakad-grid-validation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "senin",
            "startTime": "07:00",
            "endTime": "07:45",
            "kind": "lesson",
            "subjectId": fx.matematika_id
        }),
    );

    // Overlapping interval on the same day.
    let overlap = request(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "senin",
            "startTime": "07:30",
            "endTime": "08:00",
            "kind": "lesson",
            "subjectId": fx.ipa_id
        }),
    );
    assert_eq!(overlap.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&overlap), "invalid_schedule");

    // Same start time on the same day.
    let duplicate = request(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "senin",
            "startTime": "07:00",
            "endTime": "07:30",
            "kind": "lesson",
            "subjectId": fx.ipa_id
        }),
    );
    assert_eq!(error_code(&duplicate), "invalid_schedule");

    // Same times on another day are fine.
    let other_day = request(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "selasa",
            "startTime": "07:00",
            "endTime": "07:45",
            "kind": "lesson",
            "subjectId": fx.ipa_id
        }),
    );
    assert_eq!(other_day.get("ok").and_then(|v| v.as_bool()), Some(true));

    // Unpadded and inverted times never reach storage.
    let unpadded = request(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "rabu",
            "startTime": "7:00",
            "endTime": "08:00",
            "kind": "lesson",
            "subjectId": fx.matematika_id
        }),
    );
    assert_eq!(error_code(&unpadded), "invalid_schedule");

    let inverted = request(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "rabu",
            "startTime": "09:00",
            "endTime": "08:00",
            "kind": "lesson",
            "subjectId": fx.matematika_id
        }),
    );
    assert_eq!(error_code(&inverted), "invalid_schedule");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn print_html_emits_rowspan_once_and_skips_continuations() {
    let workspace = temp_dir("siakad-grid-print");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "senin",
            "startTime": "07:00",
            "endTime": "07:45",
            "kind": "lesson",
            "subjectId": fx.matematika_id
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "senin",
            "startTime": "07:45",
            "endTime": "08:30",
            "kind": "break",
            "label": "Istirahat"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.upsertSlot",
        json!({
            "classId": fx.class_id,
            "day": "selasa",
            "startTime": "07:00",
            "endTime": "08:30",
            "kind": "lesson",
            "subjectId": fx.ipa_id
        }),
    );

    let printed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.printHtml",
        json!({ "classId": fx.class_id }),
    );
    let html = printed.get("html").and_then(|v| v.as_str()).expect("html");

    assert!(html.contains("Jadwal Pelajaran 7A"));
    assert!(html.contains("<th>Senin</th>"));
    assert!(html.contains("rowspan=\"2\""));
    // The double-length lesson is rendered exactly once; the second row's
    // cell is covered by the rowspan.
    assert_eq!(html.matches("IPA (IPA7)").count(), 1);
    assert!(html.contains("Istirahat"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn empty_schedule_prints_placeholder_and_yields_no_rows() {
    let workspace = temp_dir("siakad-grid-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup(&mut stdin, &mut reader, &workspace);

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schedule.grid",
        json!({ "classId": fx.class_id }),
    );
    let rows = grid.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert!(rows.is_empty());

    let printed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.printHtml",
        json!({ "classId": fx.class_id }),
    );
    let html = printed.get("html").and_then(|v| v.as_str()).expect("html");
    assert!(html.contains("Belum ada jadwal"));
    assert!(!html.contains("<table"));

    drop(stdin);
    let _ = child.wait();
}
