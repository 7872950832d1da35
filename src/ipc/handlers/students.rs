use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn required_text(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let value = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    if value.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(value)
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };

    let group_name: Option<String> = match conn
        .query_row("SELECT name FROM groups WHERE id = ?", [group_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(group_name) = group_name else {
        return err(&req.id, "not_found", "group not found", None);
    };

    // sessions_attended is derived, never stored: counting present-marked
    // attendance rows keeps repeated saves from inflating it.
    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name, s.surname,
                (SELECT COUNT(*) FROM attendance a
                 WHERE a.student_id = s.id AND a.status = 'present') AS sessions_attended
         FROM students s
         WHERE s.group_id = ?
         ORDER BY s.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([group_id], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let surname: String = row.get(2)?;
            let sessions_attended: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "surname": surname,
                "sessionsAttended": sessions_attended
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(
            &req.id,
            json!({
                "group": { "id": group_id, "name": group_name },
                "students": students
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };
    let name = match required_text(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let surname = match required_text(req, "surname") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let group_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if group_exists.is_none() {
        return err(&req.id, "not_found", "group not found", None);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO students(name, surname, group_id) VALUES(?, ?, ?)",
        (&name, &surname, group_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": conn.last_insert_rowid() }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let name = match required_text(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let surname = match required_text(req, "surname") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let updated = match conn.execute(
        "UPDATE students SET name = ?, surname = ? WHERE id = ?",
        (&name, &surname, student_id),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            )
        }
    };
    if updated == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let deleted = match conn.execute("DELETE FROM students WHERE id = ?", [student_id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            )
        }
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
