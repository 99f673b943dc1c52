use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, school_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use uuid::Uuid;

fn schools_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let school_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, name) VALUES(?, ?)",
        (&school_id, &name),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "schools" })),
    })?;
    Ok(json!({ "schoolId": school_id, "name": name }))
}

fn students_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    let first_name = get_required_str(params, "firstName")?.trim().to_string();
    let last_name = get_required_str(params, "lastName")?.trim().to_string();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(HandlerErr::bad_params("firstName and lastName must not be empty"));
    }
    if !school_exists(conn, &school_id)? {
        return Err(HandlerErr::new("not_found", "school not found"));
    }

    let class_name = get_opt_str(params, "className");
    let section = get_opt_str(params, "section");
    let parent_phone = get_opt_str(params, "parentPhone");
    let parent_user_id = get_opt_str(params, "parentUserId");

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, school_id, first_name, last_name, class_name, section,
                              parent_phone, parent_user_id, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &student_id,
            &school_id,
            &first_name,
            &last_name,
            &class_name,
            &section,
            &parent_phone,
            &parent_user_id,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    Ok(json!({ "studentId": student_id }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = get_required_str(params, "schoolId")?;
    if !school_exists(conn, &school_id)? {
        return Err(HandlerErr::new("not_found", "school not found"));
    }
    let class_name = get_opt_str(params, "className");
    let section = get_opt_str(params, "section");

    let mut sql = String::from(
        "SELECT id, first_name, last_name, class_name, section, parent_phone, parent_user_id
         FROM students
         WHERE school_id = ? AND active = 1",
    );
    let mut binds: Vec<Value> = vec![Value::from(school_id.clone())];
    if let Some(class_name) = &class_name {
        sql.push_str(" AND class_name = ?");
        binds.push(Value::from(class_name.clone()));
    }
    if let Some(section) = &section {
        sql.push_str(" AND section = ?");
        binds.push(Value::from(section.clone()));
    }
    sql.push_str(" ORDER BY last_name, first_name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let students = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "className": r.get::<_, Option<String>>(3)?,
                "section": r.get::<_, Option<String>>(4)?,
                "parentPhone": r.get::<_, Option<String>>(5)?,
                "parentUserId": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "students": students }))
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
        "schools.create" => Some(with_db(state, req, schools_create)),
        "students.add" => Some(with_db(state, req, students_add)),
        "students.list" => Some(with_db(state, req, students_list)),
        _ => None,
    }
}
