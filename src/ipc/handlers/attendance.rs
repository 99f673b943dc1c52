use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, school_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const STATUSES: [&str; 3] = ["present", "absent", "late"];

fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };
    if !school_exists(conn, &school_id)? {
        return Err(HandlerErr::new("not_found", "school not found"));
    }

    // Validate shapes before opening the transaction.
    let mut parsed: Vec<(String, String)> = Vec::with_capacity(entries.len());
    for entry in entries {
        let student_id = get_required_str(entry, "studentId")?;
        let status = get_required_str(entry, "status")?;
        if !STATUSES.contains(&status.as_str()) {
            return Err(HandlerErr::bad_params(format!(
                "status must be one of present|absent|late, got `{}`",
                status
            )));
        }
        parsed.push((student_id, status));
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut marked = 0usize;
    let mut skipped = 0usize;
    for (student_id, status) in &parsed {
        let exists = tx
            .query_row(
                "SELECT 1 FROM students WHERE school_id = ? AND id = ?",
                (&school_id, student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(HandlerErr::db)?
            .is_some();
        if !exists {
            skipped += 1;
            continue;
        }
        tx.execute(
            "INSERT INTO attendance_records(school_id, student_id, date, status)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(school_id, student_id, date) DO UPDATE SET
               status = excluded.status",
            (&school_id, student_id, &date, status),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_records" })),
        })?;
        marked += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "date": date, "marked": marked, "skipped": skipped }))
}

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_mark(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        _ => None,
    }
}
