use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_str, now_ts, require_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn student_json(
    id: String,
    name: String,
    email: String,
    admission_number: Option<String>,
    department: Option<String>,
    active: bool,
    created_at: String,
    updated_at: Option<String>,
) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "email": email,
        "admissionNumber": admission_number,
        "department": department,
        "active": active,
        "createdAt": created_at,
        "updatedAt": updated_at
    })
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?;
    let admission_number = get_optional_str(params, "admissionNumber")?;
    let department = get_optional_str(params, "department")?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, name, email, admission_number, department, active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (
            &student_id,
            &name,
            &email,
            &admission_number,
            &department,
            now_ts(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "students" }),
        )
    })?;

    Ok(json!({ "studentId": student_id }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let search = get_optional_str(params, "search")?;
    let department = get_optional_str(params, "department")?;

    let mut sql = String::from(
        "SELECT id, name, email, admission_number, department, active, created_at, updated_at
         FROM students WHERE 1=1",
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(dep) = &department {
        sql.push_str(" AND department = ?");
        binds.push(dep.clone());
    }
    if let Some(s) = &search {
        sql.push_str(" AND (name LIKE ? OR email LIKE ? OR admission_number LIKE ?)");
        let pattern = format!("%{}%", s);
        binds.push(pattern.clone());
        binds.push(pattern.clone());
        binds.push(pattern);
    }
    sql.push_str(" ORDER BY name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            Ok(student_json(
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get::<_, i64>(5)? != 0,
                r.get(6)?,
                r.get(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "students": rows }))
}

fn students_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let row = conn
        .query_row(
            "SELECT id, name, email, admission_number, department, active, created_at, updated_at
             FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok(student_json(
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get::<_, i64>(5)? != 0,
                    r.get(6)?,
                    r.get(7)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(student) = row else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };
    Ok(json!({ "student": student }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing patch object"))?;
    let patch_value = serde_json::Value::Object(patch.clone());

    let mut sets: Vec<&'static str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(name) = get_optional_str(&patch_value, "name")? {
        sets.push("name = ?");
        binds.push(rusqlite::types::Value::Text(name));
    }
    if let Some(email) = get_optional_str(&patch_value, "email")? {
        sets.push("email = ?");
        binds.push(rusqlite::types::Value::Text(email));
    }
    if patch.contains_key("admissionNumber") {
        sets.push("admission_number = ?");
        match get_optional_str(&patch_value, "admissionNumber")? {
            Some(v) => binds.push(rusqlite::types::Value::Text(v)),
            None => binds.push(rusqlite::types::Value::Null),
        }
    }
    if patch.contains_key("department") {
        sets.push("department = ?");
        match get_optional_str(&patch_value, "department")? {
            Some(v) => binds.push(rusqlite::types::Value::Text(v)),
            None => binds.push(rusqlite::types::Value::Null),
        }
    }
    if let Some(active) = get_optional_bool(&patch_value, "active")? {
        sets.push("active = ?");
        binds.push(rusqlite::types::Value::Integer(if active { 1 } else { 0 }));
    }

    if sets.is_empty() {
        return Err(HandlerErr::new("bad_params", "patch has no known fields"));
    }

    sets.push("updated_at = ?");
    binds.push(rusqlite::types::Value::Text(now_ts()));
    binds.push(rusqlite::types::Value::Text(student_id.clone()));

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    let changed = conn
        .execute(&sql, rusqlite::params_from_iter(binds))
        .map_err(|e| {
            HandlerErr::with_details(
                "db_update_failed",
                e.to_string(),
                json!({ "table": "students" }),
            )
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    Ok(json!({ "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run = |f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>| {
        let conn = match require_conn(state) {
            Ok(c) => c,
            Err(e) => return e.response(&req.id),
        };
        match f(conn, &req.params) {
            Ok(result) => crate::ipc::error::ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }
    };

    match req.method.as_str() {
        "students.create" => Some(run(students_create)),
        "students.list" => Some(run(students_list)),
        "students.get" => Some(run(students_get)),
        "students.update" => Some(run(students_update)),
        _ => None,
    }
}
