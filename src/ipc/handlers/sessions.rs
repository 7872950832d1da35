use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::OptionalExtension;
use serde_json::json;

fn required_date(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    if NaiveDate::parse_from_str(&raw, "%Y-%m-%d").is_err() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            Some(json!({ key: raw })),
        ));
    }
    Ok(raw)
}

fn required_time(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    if NaiveTime::parse_from_str(&raw, "%H:%M").is_err() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be HH:MM", key),
            Some(json!({ key: raw })),
        ));
    }
    Ok(raw)
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };

    let group_row: Option<(String, i64)> = match conn
        .query_row(
            "SELECT name, class_id FROM groups WHERE id = ?",
            [group_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((group_name, class_id)) = group_row else {
        return err(&req.id, "not_found", "group not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, date, time FROM sessions WHERE group_id = ? ORDER BY date, time",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([group_id], |row| {
            let id: i64 = row.get(0)?;
            let date: String = row.get(1)?;
            let time: String = row.get(2)?;
            Ok(json!({ "id": id, "date": date, "time": time }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sessions) => ok(
            &req.id,
            json!({
                "group": { "id": group_id, "name": group_name, "classId": class_id },
                "sessions": sessions
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let group_id = match req.params.get("groupId").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing groupId", None),
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let time = match required_time(req, "time") {
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
        "INSERT INTO sessions(group_id, date, time) VALUES(?, ?, ?)",
        (group_id, &date, &time),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        );
    }

    ok(&req.id, json!({ "sessionId": conn.last_insert_rowid() }))
}

fn handle_sessions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session_id = match req.params.get("sessionId").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing sessionId", None),
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let time = match required_time(req, "time") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let updated = match conn.execute(
        "UPDATE sessions SET date = ?, time = ? WHERE id = ?",
        (&date, &time, session_id),
    ) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "sessions" })),
            )
        }
    };
    if updated == 0 {
        return err(&req.id, "not_found", "session not found", None);
    }

    ok(&req.id, json!({ "sessionId": session_id }))
}

fn handle_sessions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let session_id = match req.params.get("sessionId").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing sessionId", None),
    };

    let deleted = match conn.execute("DELETE FROM sessions WHERE id = ?", [session_id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "sessions" })),
            )
        }
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "session not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.create" => Some(handle_sessions_create(state, req)),
        "sessions.update" => Some(handle_sessions_update(state, req)),
        "sessions.delete" => Some(handle_sessions_delete(state, req)),
        _ => None,
    }
}
