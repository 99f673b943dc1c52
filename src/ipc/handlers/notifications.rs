use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_opt_usize, get_required_str, get_str_array, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, AppChannel, AppNotification, DispatchArgs, EventKind, Recipient};
use crate::sms::{build_provider, SmsError};
use chrono::{Local, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: usize = 50;

/// In-app channel over the notifications table. The whole batch lands in one
/// transaction; any failure rolls it back and surfaces as a channel failure
/// in the dispatch summary.
struct SqliteAppChannel<'a> {
    conn: &'a Connection,
}

impl AppChannel for SqliteAppChannel<'_> {
    fn insert_batch(&self, rows: &[AppNotification]) -> Result<usize, String> {
        if rows.is_empty() {
            return Ok(0);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| e.to_string())?;
        let now = Utc::now().to_rfc3339();
        for row in rows {
            tx.execute(
                "INSERT INTO notifications(id, user_id, type, title, message, priority,
                                           action_url, data, is_read, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &row.user_id,
                    row.kind,
                    &row.title,
                    &row.message,
                    row.priority,
                    row.action_url,
                    row.data.to_string(),
                    &now,
                ),
            )
            .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())?;
        Ok(rows.len())
    }
}

fn school_name(conn: &Connection, school_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row("SELECT name FROM schools WHERE id = ?", [school_id], |r| {
        r.get(0)
    })
    .optional()
    .map_err(HandlerErr::db)
}

/// Audience resolution, the COLLECTING step: absence alerts target students
/// with an absent attendance row for the date, everything else targets the
/// school's active roster, both with optional class/section narrowing.
fn resolve_audience(
    conn: &Connection,
    kind: EventKind,
    school_id: &str,
    date: &str,
    class_name: Option<&str>,
    section: Option<&str>,
) -> Result<Vec<Recipient>, HandlerErr> {
    let mut sql = String::from(
        "SELECT s.id, s.first_name, s.last_name, s.parent_phone, s.parent_user_id
         FROM students s",
    );
    let mut binds: Vec<Value> = Vec::new();
    if kind == EventKind::AbsenceAlert {
        sql.push_str(
            " JOIN attendance_records a
                ON a.student_id = s.id AND a.school_id = s.school_id
             WHERE s.school_id = ? AND s.active = 1
               AND a.date = ? AND a.status = 'absent'",
        );
        binds.push(Value::from(school_id.to_string()));
        binds.push(Value::from(date.to_string()));
    } else {
        sql.push_str(" WHERE s.school_id = ? AND s.active = 1");
        binds.push(Value::from(school_id.to_string()));
    }
    if let Some(class_name) = class_name {
        sql.push_str(" AND s.class_name = ?");
        binds.push(Value::from(class_name.to_string()));
    }
    if let Some(section) = section {
        sql.push_str(" AND s.section = ?");
        binds.push(Value::from(section.to_string()));
    }
    sql.push_str(" ORDER BY s.last_name, s.first_name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    stmt.query_map(params_from_iter(binds), |r| {
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        Ok(Recipient {
            student_id: r.get(0)?,
            student_name: format!("{} {}", first, last),
            phone: r.get(3)?,
            user_id: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn handle_dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match dispatch(conn, state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn dispatch(
    conn: &Connection,
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let kind = EventKind::parse(&get_required_str(params, "eventType")?);
    let date = match get_opt_str(params, "date") {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))?
            .format("%Y-%m-%d")
            .to_string(),
        None => Local::now().date_naive().format("%Y-%m-%d").to_string(),
    };
    let class_name = get_opt_str(params, "className");
    let section = get_opt_str(params, "section");
    let title_override = get_opt_str(params, "title");
    let message_override = get_opt_str(params, "message");
    let sms_cap = get_opt_usize(params, "smsCap")?.unwrap_or(state.notify.sms_cap);

    let Some(school) = school_name(conn, &school_id)? else {
        return Err(HandlerErr::new("not_found", "school not found"));
    };

    // Misconfiguration fails the dispatch once, before any recipient work.
    let provider = build_provider(&state.notify).map_err(|e| match e {
        SmsError::Config(msg) => HandlerErr::new("config_error", msg),
        other => HandlerErr::new("config_error", other.to_string()),
    })?;

    let audience = resolve_audience(
        conn,
        kind,
        &school_id,
        &date,
        class_name.as_deref(),
        section.as_deref(),
    )?;

    let app = SqliteAppChannel { conn };
    let summary = notify::dispatch(
        &audience,
        provider.as_ref(),
        &app,
        &DispatchArgs {
            kind,
            school_id: &school_id,
            school_name: &school,
            date: &date,
            title_override: title_override.as_deref(),
            message_override: message_override.as_deref(),
            sms_cap,
        },
    );
    serde_json::to_value(&summary).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn notifications_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let unread_only = params
        .get("unreadOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let limit = get_opt_usize(params, "limit")?.unwrap_or(DEFAULT_LIST_LIMIT);

    let mut sql = String::from(
        "SELECT id, type, title, message, priority, action_url, data, is_read, created_at, read_at
         FROM notifications
         WHERE user_id = ?",
    );
    if unread_only {
        sql.push_str(" AND is_read = 0");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ?");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&user_id, limit as i64), |r| {
            let data_raw: Option<String> = r.get(6)?;
            let data = data_raw
                .as_deref()
                .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
                .unwrap_or(serde_json::Value::Null);
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "type": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "message": r.get::<_, String>(3)?,
                "priority": r.get::<_, String>(4)?,
                "actionUrl": r.get::<_, Option<String>>(5)?,
                "data": data,
                "isRead": r.get::<_, i64>(7)? != 0,
                "createdAt": r.get::<_, String>(8)?,
                "readAt": r.get::<_, Option<String>>(9)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "notifications": rows }))
}

/// Mark-read only ever touches unread rows, so `read_at` records the first
/// transition and repeat calls are no-ops.
fn notifications_mark_read(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let all = params.get("all").and_then(|v| v.as_bool()).unwrap_or(false);
    let now = Utc::now().to_rfc3339();

    let updated = if all {
        let user_id = get_required_str(params, "userId")?;
        conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = ?
             WHERE user_id = ? AND is_read = 0",
            (&now, &user_id),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "notifications" })),
        })?
    } else {
        let ids = get_str_array(params, "ids")?;
        if ids.is_empty() {
            return Ok(json!({ "updated": 0 }));
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE notifications SET is_read = 1, read_at = ?
             WHERE id IN ({placeholders}) AND is_read = 0"
        );
        let mut binds: Vec<Value> = vec![Value::from(now)];
        binds.extend(ids.into_iter().map(Value::from));
        conn.execute(&sql, params_from_iter(binds))
            .map_err(|e| HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "notifications" })),
            })?
    };
    Ok(json!({ "updated": updated }))
}

fn notifications_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ids = get_str_array(params, "ids")?;
    if ids.is_empty() {
        return Ok(json!({ "deleted": 0 }));
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("DELETE FROM notifications WHERE id IN ({placeholders})");
    let binds: Vec<Value> = ids.into_iter().map(Value::from).collect();
    let deleted = conn
        .execute(&sql, params_from_iter(binds))
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "notifications" })),
        })?;
    Ok(json!({ "deleted": deleted }))
}

fn with_db(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
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
        "notifications.dispatch" => Some(handle_dispatch(state, req)),
        "notifications.list" => Some(with_db(state, req, notifications_list)),
        "notifications.markRead" => Some(with_db(state, req, notifications_mark_read)),
        "notifications.delete" => Some(with_db(state, req, notifications_delete)),
        _ => None,
    }
}
