use calamine::{open_workbook_auto, Reader};
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
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
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

fn cell(range: &calamine::Range<calamine::Data>, row: u32, col: u32) -> String {
    range
        .get_value((row, col))
        .map(|d| d.to_string())
        .unwrap_or_default()
}

#[test]
fn range_export_defaults_missing_rows_to_present() {
    let workspace = temp_dir("attendanced-range-export");
    let out_path = workspace.join("Attendance_Report.xlsx");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

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
        json!({ "name": "1CP A", "specialty": "CS", "level": "L1", "year": "2024" }),
    );
    let class_id = class.get("classId").and_then(|v| v.as_i64()).expect("classId");
    let group = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.create",
        json!({ "classId": class_id, "name": "G1", "type": "TD" }),
    );
    let group_id = group.get("groupId").and_then(|v| v.as_i64()).expect("groupId");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "groupId": group_id, "name": "Amine", "surname": "Bensalem" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_i64())
        .expect("studentId");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.create",
        json!({ "groupId": group_id, "date": "2024-01-10", "time": "08:00" }),
    );
    let first_session = first
        .get("sessionId")
        .and_then(|v| v.as_i64())
        .expect("sessionId");
    // Second session gets no attendance save at all.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.create",
        json!({ "groupId": group_id, "date": "2024-01-17", "time": "08:00" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.save",
        json!({
            "groupId": group_id,
            "sessionId": first_session,
            "entries": [
                { "studentId": student_id, "status": "justified" }
            ]
        }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "exchange.exportAttendanceRange",
        json!({
            "dateStart": "2024-01-01",
            "dateEnd": "2024-01-31",
            "outPath": out_path.to_string_lossy()
        }),
    );
    assert_eq!(
        exported.get("filename").and_then(|v| v.as_str()),
        Some("Attendance_Report.xlsx")
    );
    assert_eq!(exported.get("sessionCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(exported.get("studentCount").and_then(|v| v.as_i64()), Some(1));

    let mut workbook = open_workbook_auto(&out_path).expect("open exported report");
    let range = workbook
        .worksheet_range_at(0)
        .expect("first sheet")
        .expect("sheet range");

    assert_eq!(cell(&range, 0, 0), "Student Name");
    assert_eq!(cell(&range, 0, 1), "Student Surname");
    assert_eq!(cell(&range, 0, 2), "2024-01-10");
    assert_eq!(cell(&range, 0, 3), "2024-01-17");

    assert_eq!(cell(&range, 1, 0), "Amine");
    assert_eq!(cell(&range, 1, 1), "Bensalem");
    // Recorded status on the 10th, default-to-present on the 17th.
    assert_eq!(cell(&range, 1, 2), "justified");
    assert_eq!(cell(&range, 1, 3), "present");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_range_is_a_distinct_signal_not_an_empty_workbook() {
    let workspace = temp_dir("attendanced-range-empty");
    let out_path = workspace.join("Attendance_Report.xlsx");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "exchange.exportAttendanceRange",
        json!({
            "dateStart": "2025-06-01",
            "dateEnd": "2025-06-30",
            "outPath": out_path.to_string_lossy()
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("no_sessions")
    );
    assert!(!out_path.exists(), "no workbook should be written");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn missing_dates_are_validation_errors() {
    let workspace = temp_dir("attendanced-range-params");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "exchange.exportAttendanceRange",
        json!({
            "dateStart": "2024-01-01",
            "outPath": workspace.join("out.xlsx").to_string_lossy()
        }),
    );
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "exchange.exportAttendanceRange",
        json!({
            "dateStart": "01/01/2024",
            "dateEnd": "2024-01-31",
            "outPath": workspace.join("out.xlsx").to_string_lossy()
        }),
    );
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
