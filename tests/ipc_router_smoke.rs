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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("attendanced-router-smoke");
    let report_out = workspace.join("smoke-report.xlsx");
    let roster_out = workspace.join("smoke-roster.xlsx");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({
            "name": "Smoke Class",
            "specialty": "Computer Science",
            "level": "L3",
            "year": "2024"
        }),
    );
    let class_id = created
        .get("result")
        .and_then(|v| v.get("classId"))
        .and_then(|v| v.as_i64())
        .expect("classId");

    let _ = request(&mut stdin, &mut reader, "4", "classes.list", json!({}));
    let created_group = request(
        &mut stdin,
        &mut reader,
        "5",
        "groups.create",
        json!({ "classId": class_id, "name": "Smoke Group", "type": "TD" }),
    );
    let group_id = created_group
        .get("result")
        .and_then(|v| v.get("groupId"))
        .and_then(|v| v.as_i64())
        .expect("groupId");

    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "groups.list",
        json!({ "classId": class_id }),
    );
    let created_student = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({ "groupId": group_id, "name": "Smoke", "surname": "Student" }),
    );
    let student_id = created_student
        .get("result")
        .and_then(|v| v.get("studentId"))
        .and_then(|v| v.as_i64())
        .expect("studentId");

    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "students.update",
        json!({ "studentId": student_id, "name": "Updated", "surname": "Student" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "students.list",
        json!({ "groupId": group_id }),
    );

    let created_session = request(
        &mut stdin,
        &mut reader,
        "10",
        "sessions.create",
        json!({ "groupId": group_id, "date": "2024-03-08", "time": "10:30" }),
    );
    let session_id = created_session
        .get("result")
        .and_then(|v| v.get("sessionId"))
        .and_then(|v| v.as_i64())
        .expect("sessionId");

    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "sessions.list",
        json!({ "groupId": group_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.sessionOpen",
        json!({ "sessionId": session_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "attendance.save",
        json!({
            "groupId": group_id,
            "sessionId": session_id,
            "entries": [
                { "studentId": student_id, "status": "present", "observation": "on time" }
            ]
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "exchange.exportAttendanceRange",
        json!({
            "dateStart": "2024-03-01",
            "dateEnd": "2024-03-31",
            "outPath": report_out.to_string_lossy()
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "exchange.exportSession",
        json!({
            "sessionId": session_id,
            "outPath": workspace.join("smoke-session.xlsx").to_string_lossy()
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "exchange.exportGroupStudents",
        json!({ "groupId": group_id, "outPath": roster_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "sessions.delete",
        json!({ "sessionId": session_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "classes.delete",
        json!({ "classId": class_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
