use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

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

#[derive(Debug, Clone)]
struct SessionRow {
    id: i64,
    group_id: i64,
    date: String,
    time: String,
}

fn get_required_id(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn find_session(conn: &Connection, session_id: i64) -> Result<Option<SessionRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, group_id, date, time FROM sessions WHERE id = ?",
        [session_id],
        |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                group_id: r.get(1)?,
                date: r.get(2)?,
                time: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn group_student_ids(conn: &Connection, group_id: i64) -> Result<Vec<i64>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE group_id = ? ORDER BY id")
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    stmt.query_map([group_id], |r| r.get::<_, i64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })
}

fn parse_status(student_id: i64, v: Option<&serde_json::Value>) -> Result<Option<String>, HandlerErr> {
    let Some(v) = v else { return Ok(None) };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "status must be string or null".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    };
    let t = s.trim();
    if t.is_empty() {
        return Ok(None);
    }
    match t {
        "present" | "absent" | "justified" => Ok(Some(t.to_string())),
        other => Err(HandlerErr {
            code: "bad_params",
            message: "status must be one of: present, absent, justified".to_string(),
            details: Some(json!({ "studentId": student_id, "status": other })),
        }),
    }
}

fn session_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_id(params, "sessionId")?;
    let session = find_session(conn, session_id)?.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "session not found".to_string(),
        details: None,
    })?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.surname, a.status, a.observation
             FROM students s
             LEFT JOIN attendance a ON s.id = a.student_id AND a.session_id = ?
             WHERE s.group_id = ?
             ORDER BY s.id",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let students = stmt
        .query_map((session.id, session.group_id), |r| {
            let id: i64 = r.get(0)?;
            let name: String = r.get(1)?;
            let surname: String = r.get(2)?;
            let status: Option<String> = r.get(3)?;
            let observation: Option<String> = r.get(4)?;
            Ok(json!({
                "studentId": id,
                "name": name,
                "surname": surname,
                "status": status,
                "observation": observation
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    Ok(json!({
        "session": {
            "id": session.id,
            "groupId": session.group_id,
            "date": session.date,
            "time": session.time
        },
        "students": students
    }))
}

fn save(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_id(params, "groupId")?;
    let session_id = get_required_id(params, "sessionId")?;

    let session = find_session(conn, session_id)?.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "session not found".to_string(),
        details: None,
    })?;
    if session.group_id != group_id {
        return Err(HandlerErr {
            code: "not_found",
            message: "session does not belong to group".to_string(),
            details: Some(json!({ "sessionId": session_id, "groupId": group_id })),
        });
    }

    let student_ids = group_student_ids(conn, group_id)?;

    // Entries are keyed back to the group roster; a student the form said
    // nothing about is still written, with both fields unset. Entries for
    // students outside the group are dropped.
    let mut by_student: HashMap<i64, (Option<String>, Option<String>)> = HashMap::new();
    if let Some(entries) = params.get("entries").and_then(|v| v.as_array()) {
        for entry in entries {
            let Some(student_id) = entry.get("studentId").and_then(|v| v.as_i64()) else {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: "entry missing studentId".to_string(),
                    details: None,
                });
            };
            let status = parse_status(student_id, entry.get("status"))?;
            let observation = entry
                .get("observation")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            by_student.insert(student_id, (status, observation));
        }
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for student_id in &student_ids {
        let (status, observation) = by_student
            .get(student_id)
            .cloned()
            .unwrap_or((None, None));
        tx.execute(
            "INSERT INTO attendance(student_id, session_id, status, observation)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, session_id) DO UPDATE SET
               status = excluded.status,
               observation = excluded.observation",
            (student_id, session_id, &status, &observation),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance", "studentId": student_id })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "saved": student_ids.len() }))
}

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match session_open(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match save(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.sessionOpen" => Some(handle_session_open(state, req)),
        "attendance.save" => Some(handle_save(state, req)),
        _ => None,
    }
}
