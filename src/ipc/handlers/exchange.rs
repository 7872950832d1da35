use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::sheet;
use calamine::{open_workbook_auto, Reader};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;

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

fn db_err(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn sheet_err(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr {
        code: "sheet_failed",
        message: e.to_string(),
        details: None,
    }
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

fn get_required_path(params: &serde_json::Value, key: &str) -> Result<PathBuf, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn get_required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })?;
    if NaiveDate::parse_from_str(&raw, "%Y-%m-%d").is_err() {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("{} must be YYYY-MM-DD", key),
            details: Some(json!({ key: raw })),
        });
    }
    Ok(raw)
}

fn save_workbook(
    workbook: &mut rust_xlsxwriter::Workbook,
    out_path: &PathBuf,
) -> Result<(), HandlerErr> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
            code: "io_failed",
            message: e.to_string(),
            details: Some(json!({ "path": out_path.to_string_lossy() })),
        })?;
    }
    workbook.save(out_path).map_err(|e| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: Some(json!({ "path": out_path.to_string_lossy() })),
    })
}

fn export_attendance_range(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date_start = get_required_date(params, "dateStart")?;
    let date_end = get_required_date(params, "dateEnd")?;
    let out_path = get_required_path(params, "outPath")?;

    let mut session_stmt = conn
        .prepare(
            "SELECT id, date FROM sessions
             WHERE date BETWEEN ? AND ?
             ORDER BY date",
        )
        .map_err(db_err)?;
    let sessions: Vec<(i64, String)> = session_stmt
        .query_map((&date_start, &date_end), |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    if sessions.is_empty() {
        return Err(HandlerErr {
            code: "no_sessions",
            message: "no sessions found in the selected date range".to_string(),
            details: Some(json!({ "dateStart": date_start, "dateEnd": date_end })),
        });
    }

    let mut student_stmt = conn
        .prepare("SELECT id, name, surname FROM students ORDER BY id")
        .map_err(db_err)?;
    let students: Vec<(i64, String, String)> = student_stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    // Collection-bound IN list; placeholder counts never built by hand.
    let placeholders = std::iter::repeat("?")
        .take(sessions.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT student_id, session_id, status FROM attendance
         WHERE session_id IN ({})",
        placeholders
    );
    let bind_values: Vec<Value> = sessions.iter().map(|(id, _)| Value::Integer(*id)).collect();
    let mut attendance_stmt = conn.prepare(&sql).map_err(db_err)?;
    let mut by_pair: HashMap<(i64, i64), Option<String>> = HashMap::new();
    let attendance_rows = attendance_stmt
        .query_map(params_from_iter(bind_values), |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    for (student_id, session_id, status) in attendance_rows {
        by_pair.insert((student_id, session_id), status);
    }

    let mut workbook = rust_xlsxwriter::Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Attendance Report").map_err(sheet_err)?;

    let header = sheet::header_format();
    worksheet
        .write_with_format(0, 0, "Student Name", &header)
        .map_err(sheet_err)?;
    worksheet
        .write_with_format(0, 1, "Student Surname", &header)
        .map_err(sheet_err)?;
    for (col, (_, date)) in sessions.iter().enumerate() {
        worksheet
            .write_with_format(0, (col + 2) as u16, date.as_str(), &header)
            .map_err(sheet_err)?;
    }

    for (row, (student_id, name, surname)) in students.iter().enumerate() {
        let row = (row + 1) as u32;
        worksheet.write(row, 0, name.as_str()).map_err(sheet_err)?;
        worksheet
            .write(row, 1, surname.as_str())
            .map_err(sheet_err)?;
        for (col, (session_id, _)) in sessions.iter().enumerate() {
            let col = (col + 2) as u16;
            // No attendance row at all means "present" (deliberate business
            // rule); a stored NULL status stays an empty cell.
            match by_pair.get(&(*student_id, *session_id)) {
                Some(Some(status)) => {
                    worksheet.write(row, col, status.as_str()).map_err(sheet_err)?;
                }
                Some(None) => {}
                None => {
                    worksheet.write(row, col, "present").map_err(sheet_err)?;
                }
            }
        }
    }

    save_workbook(&mut workbook, &out_path)?;

    Ok(json!({
        "path": out_path.to_string_lossy(),
        "filename": "Attendance_Report.xlsx",
        "mimeType": sheet::XLSX_MIME,
        "sessionCount": sessions.len(),
        "studentCount": students.len()
    }))
}

fn export_session(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_id(params, "sessionId")?;
    let out_path = get_required_path(params, "outPath")?;

    let session: Option<(i64, String, String)> = conn
        .query_row(
            "SELECT group_id, date, time FROM sessions WHERE id = ?",
            [session_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((group_id, date, time)) = session else {
        return Err(HandlerErr {
            code: "not_found",
            message: "session not found".to_string(),
            details: None,
        });
    };

    // Inner join on purpose: students without an attendance row for this
    // session are left out of the sheet.
    let mut stmt = conn
        .prepare(
            "SELECT s.name, s.surname, a.status, a.observation
             FROM students s
             JOIN attendance a ON s.id = a.student_id
             WHERE a.session_id = ?
             ORDER BY s.id",
        )
        .map_err(db_err)?;
    let rows: Vec<(String, String, Option<String>, Option<String>)> = stmt
        .query_map([session_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut workbook = rust_xlsxwriter::Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Session Attendance").map_err(sheet_err)?;

    let header = sheet::header_format();
    worksheet
        .write_with_format(0, 0, "Session ID", &header)
        .map_err(sheet_err)?;
    worksheet.write(0, 1, session_id).map_err(sheet_err)?;
    worksheet
        .write_with_format(1, 0, "Group ID", &header)
        .map_err(sheet_err)?;
    worksheet.write(1, 1, group_id).map_err(sheet_err)?;
    worksheet
        .write_with_format(2, 0, "Date", &header)
        .map_err(sheet_err)?;
    worksheet.write(2, 1, date.as_str()).map_err(sheet_err)?;
    worksheet
        .write_with_format(3, 0, "Time", &header)
        .map_err(sheet_err)?;
    worksheet.write(3, 1, time.as_str()).map_err(sheet_err)?;

    for (col, title) in ["Name", "Surname", "Status", "Observation"].iter().enumerate() {
        worksheet
            .write_with_format(6, col as u16, *title, &header)
            .map_err(sheet_err)?;
    }

    let row_count = rows.len();
    for (i, (name, surname, status, observation)) in rows.into_iter().enumerate() {
        let row = (i + 7) as u32;
        worksheet.write(row, 0, name.as_str()).map_err(sheet_err)?;
        worksheet
            .write(row, 1, surname.as_str())
            .map_err(sheet_err)?;
        if let Some(status) = status {
            worksheet.write(row, 2, status.as_str()).map_err(sheet_err)?;
        }
        if let Some(observation) = observation {
            worksheet
                .write(row, 3, observation.as_str())
                .map_err(sheet_err)?;
        }
    }

    save_workbook(&mut workbook, &out_path)?;

    Ok(json!({
        "path": out_path.to_string_lossy(),
        "filename": format!("session_{}_attendance.xlsx", session_id),
        "mimeType": sheet::XLSX_MIME,
        "rowCount": row_count
    }))
}

fn export_group_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_id(params, "groupId")?;
    let out_path = get_required_path(params, "outPath")?;

    let group_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if group_exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "group not found".to_string(),
            details: None,
        });
    }

    let mut stmt = conn
        .prepare("SELECT name, surname FROM students WHERE group_id = ? ORDER BY id")
        .map_err(db_err)?;
    let rows: Vec<(String, String)> = stmt
        .query_map([group_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut workbook = rust_xlsxwriter::Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Students").map_err(sheet_err)?;

    let header = sheet::header_format();
    worksheet
        .write_with_format(0, 0, "Name", &header)
        .map_err(sheet_err)?;
    worksheet
        .write_with_format(0, 1, "Surname", &header)
        .map_err(sheet_err)?;
    let row_count = rows.len();
    for (i, (name, surname)) in rows.into_iter().enumerate() {
        let row = (i + 1) as u32;
        worksheet.write(row, 0, name.as_str()).map_err(sheet_err)?;
        worksheet
            .write(row, 1, surname.as_str())
            .map_err(sheet_err)?;
    }

    save_workbook(&mut workbook, &out_path)?;

    Ok(json!({
        "path": out_path.to_string_lossy(),
        "filename": format!("students_group_{}.xlsx", group_id),
        "mimeType": sheet::XLSX_MIME,
        "rowCount": row_count
    }))
}

fn import_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_id(params, "groupId")?;
    let in_path = get_required_path(params, "inPath")?;

    let group_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if group_exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "group not found".to_string(),
            details: None,
        });
    }

    if !sheet::is_spreadsheet_upload(&in_path) {
        return Err(HandlerErr {
            code: "bad_format",
            message: "invalid file format, expected .xlsx or .xls".to_string(),
            details: Some(json!({ "path": in_path.to_string_lossy() })),
        });
    }

    let mut workbook = open_workbook_auto(&in_path).map_err(|e| HandlerErr {
        code: "sheet_failed",
        message: e.to_string(),
        details: Some(json!({ "path": in_path.to_string_lossy() })),
    })?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| HandlerErr {
            code: "sheet_failed",
            message: "workbook has no sheets".to_string(),
            details: None,
        })?
        .map_err(sheet_err)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut imported: Vec<serde_json::Value> = Vec::new();
    // First row is the header; rows with a missing name or surname are
    // skipped without a diagnostic, matching the upload form's behavior.
    for row in range.rows().skip(1) {
        let name = row.first().and_then(sheet::cell_text);
        let surname = row.get(1).and_then(sheet::cell_text);
        let (Some(name), Some(surname)) = (name, surname) else {
            continue;
        };
        tx.execute(
            "INSERT INTO students(name, surname, group_id) VALUES(?, ?, ?)",
            (&name, &surname, group_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
        imported.push(json!({ "name": name, "surname": surname }));
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    let imported_count = imported.len();
    Ok(json!({
        "imported": imported,
        "importedCount": imported_count
    }))
}

fn handle(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exchange.exportAttendanceRange" => Some(handle(state, req, export_attendance_range)),
        "exchange.exportSession" => Some(handle(state, req, export_session)),
        "exchange.exportGroupStudents" => Some(handle(state, req, export_group_students)),
        "exchange.importStudents" => Some(handle(state, req, import_students)),
        _ => None,
    }
}
