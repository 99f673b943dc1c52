use crate::access::{self, AccessLevel, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn parse_level(params: &serde_json::Value, key: &str) -> Result<AccessLevel, HandlerErr> {
    let raw = get_required_str(params, key)?;
    AccessLevel::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "{} must be one of none|view|edit|delete|all, got `{}`",
            key, raw
        ))
    })
}

fn parse_role(params: &serde_json::Value) -> Result<Role, HandlerErr> {
    let raw = get_required_str(params, "role")?;
    Role::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown role `{}`", raw)))
}

fn fetch_access_map(
    conn: &Connection,
    principal_id: &str,
) -> Result<HashMap<String, AccessLevel>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT module, level FROM access_grants WHERE principal_id = ?")
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([principal_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    // Malformed stored levels degrade to `none` instead of failing the read.
    Ok(rows
        .into_iter()
        .map(|(module, level)| (module, AccessLevel::parse_stored(&level)))
        .collect())
}

fn upsert_grant(
    conn: &Connection,
    principal_id: &str,
    module: &str,
    level: AccessLevel,
    sub_domain: Option<&str>,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO access_grants(id, principal_id, module, level, sub_domain, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(principal_id, module) DO UPDATE SET
           level = excluded.level,
           sub_domain = excluded.sub_domain,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            principal_id,
            module,
            level.as_str(),
            sub_domain,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "access_grants" })),
    })?;
    Ok(())
}

fn access_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let principal_id = get_required_str(params, "principalId")?;
    let mut stmt = conn
        .prepare("SELECT module, level, sub_domain FROM access_grants WHERE principal_id = ?")
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&principal_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut grants = serde_json::Map::new();
    for (module, level, sub_domain) in rows {
        grants.insert(
            module,
            json!({
                "level": AccessLevel::parse_stored(&level).as_str(),
                "subDomain": sub_domain,
            }),
        );
    }
    Ok(json!({ "principalId": principal_id, "grants": grants }))
}

fn access_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal_id = get_required_str(params, "principalId")?;
    let module = get_required_str(params, "module")?;
    if module.trim().is_empty() {
        return Err(HandlerErr::bad_params("module must not be empty"));
    }
    let level = parse_level(params, "level")?;
    let sub_domain = get_opt_str(params, "subDomain");
    upsert_grant(conn, &principal_id, &module, level, sub_domain.as_deref())?;
    Ok(json!({ "principalId": principal_id, "module": module, "level": level.as_str() }))
}

fn access_remove(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal_id = get_required_str(params, "principalId")?;
    let module = get_required_str(params, "module")?;
    let changed = conn
        .execute(
            "DELETE FROM access_grants WHERE principal_id = ? AND module = ?",
            (&principal_id, &module),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "access_grants" })),
        })?;
    Ok(json!({ "removed": changed > 0 }))
}

fn access_replace_all(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal_id = get_required_str(params, "principalId")?;
    let Some(items) = params.get("grants").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing grants"));
    };

    // Validate everything up front so the transaction never half-applies a
    // malformed request.
    let mut grants: Vec<(String, AccessLevel, Option<String>)> = Vec::with_capacity(items.len());
    for item in items {
        let module = get_required_str(item, "module")?;
        if module.trim().is_empty() {
            return Err(HandlerErr::bad_params("module must not be empty"));
        }
        let level = parse_level(item, "level")?;
        let sub_domain = get_opt_str(item, "subDomain");
        grants.push((module, level, sub_domain));
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute(
        "DELETE FROM access_grants WHERE principal_id = ?",
        [&principal_id],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "access_grants" })),
    })?;
    let now = Utc::now().to_rfc3339();
    for (module, level, sub_domain) in &grants {
        tx.execute(
            "INSERT INTO access_grants(id, principal_id, module, level, sub_domain, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &principal_id,
                module,
                level.as_str(),
                sub_domain,
                &now,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "access_grants" })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "principalId": principal_id, "replaced": grants.len() }))
}

fn access_provision_defaults(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal_id = get_required_str(params, "principalId")?;
    let role = parse_role(params)?;
    let table = access::default_grants(role);
    if table.is_empty() {
        return Ok(json!({ "role": role.as_str(), "provisioned": 0 }));
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (module, level) in table {
        upsert_grant(&tx, &principal_id, module, *level, None)?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "role": role.as_str(), "provisioned": table.len() }))
}

fn access_evaluate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let principal_id = get_required_str(params, "principalId")?;
    let role = parse_role(params)?;
    let module = get_required_str(params, "module")?;

    // The super-admin answer does not depend on stored grants, so skip the
    // fetch entirely for that role.
    let map = if role == Role::SuperAdmin {
        HashMap::new()
    } else {
        fetch_access_map(conn, &principal_id)?
    };
    let decision = access::evaluate(role, &module, &map);
    let mut result = serde_json::to_value(decision).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })?;
    result["principalId"] = json!(principal_id);
    result["module"] = json!(module);
    Ok(result)
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
        "access.get" => Some(with_db(state, req, access_get)),
        "access.upsert" => Some(with_db(state, req, access_upsert)),
        "access.remove" => Some(with_db(state, req, access_remove)),
        "access.replaceAll" => Some(with_db(state, req, access_replace_all)),
        "access.provisionDefaults" => Some(with_db(state, req, access_provision_defaults)),
        "access.evaluate" => Some(with_db(state, req, access_evaluate)),
        _ => None,
    }
}
