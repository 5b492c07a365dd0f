use crate::ipc::helpers::{
    get_optional_bool, get_optional_f64, get_optional_i64, get_optional_str, get_required_str,
    load_structure, now_ts, require_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, FeeComponent, FeeStructureType, SemesterFee};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SemesterInput {
    semester: i64,
    semester_name: String,
    fees: FeeComponent,
}

/// Parse and validate the `semesters` param. Totals are recomputed here so
/// a stored total can never disagree with its components.
fn parse_semesters(params: &serde_json::Value) -> Result<(Vec<SemesterFee>, f64), HandlerErr> {
    let raw = params
        .get("semesters")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing semesters"))?;
    let inputs: Vec<SemesterInput> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::new("bad_params", format!("semesters: {}", e)))?;
    if inputs.is_empty() {
        return Err(HandlerErr::new("bad_params", "semesters must not be empty"));
    }

    let mut semesters: Vec<SemesterFee> = Vec::with_capacity(inputs.len());
    for input in inputs {
        if input.semester < 1 {
            return Err(HandlerErr::new(
                "bad_params",
                "semester numbers are 1-based positive integers",
            ));
        }
        if semesters.iter().any(|s| s.semester == input.semester) {
            return Err(HandlerErr::with_details(
                "bad_params",
                "duplicate semester number",
                json!({ "semester": input.semester }),
            ));
        }
        if let Some(field) = ledger::invalid_component_field(&input.fees) {
            return Err(HandlerErr::with_details(
                "invalid_fee_value",
                "fee values must be non-negative numbers",
                json!({ "semester": input.semester, "field": field }),
            ));
        }
        semesters.push(SemesterFee {
            semester: input.semester,
            semester_name: input.semester_name,
            fees: input.fees,
            total: 0.0,
        });
    }
    semesters.sort_by_key(|s| s.semester);
    let grand_total = ledger::recompute_totals(&mut semesters);
    Ok((semesters, grand_total))
}

fn parse_hostel_fee(params: &serde_json::Value) -> Result<Option<f64>, HandlerErr> {
    let Some(v) = get_optional_f64(params, "hostelFee")? else {
        return Ok(None);
    };
    if !v.is_finite() || v < 0.0 {
        return Err(HandlerErr::with_details(
            "invalid_fee_value",
            "hostelFee must be a non-negative number",
            json!({ "field": "hostelFee" }),
        ));
    }
    Ok(Some(v))
}

fn insert_semester_rows(
    conn: &Connection,
    structure_id: &str,
    semesters: &[SemesterFee],
) -> Result<(), HandlerErr> {
    for s in semesters {
        conn.execute(
            "INSERT INTO semester_fees(structure_id, semester, semester_name, admission_fee,
                 exam_permit_reg_fee, special_fee, tuition_fee, fee_fund_charges, others, total)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                structure_id,
                s.semester,
                &s.semester_name,
                s.fees.admission_fee,
                s.fees.exam_permit_reg_fee,
                s.fees.special_fee,
                s.fees.tuition_fee,
                s.fees.fee_fund_charges,
                s.fees.others,
                s.total,
            ),
        )
        .map_err(|e| {
            HandlerErr::with_details(
                "db_insert_failed",
                e.to_string(),
                json!({ "table": "semester_fees" }),
            )
        })?;
    }
    Ok(())
}

fn structures_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let type_raw = get_required_str(params, "type")?;
    let Some(structure_type) = FeeStructureType::parse(&type_raw) else {
        return Err(HandlerErr::with_details(
            "bad_params",
            "unknown fee structure type",
            json!({ "type": type_raw }),
        ));
    };
    let academic_year = get_required_str(params, "academicYear")?;
    let title = get_required_str(params, "title")?;
    let description = get_optional_str(params, "description")?;
    let effective_date = get_required_str(params, "effectiveDate")?;
    let created_by = get_optional_str(params, "createdBy")?.unwrap_or_else(|| "admin".to_string());
    let hostel_fee = parse_hostel_fee(params)?;
    let (semesters, grand_total) = parse_semesters(params)?;

    let structure_id = Uuid::new_v4().to_string();
    let now = now_ts();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    tx.execute(
        "INSERT INTO fee_structures(id, structure_type, academic_year, title, description,
             effective_date, is_active, grand_total, hostel_fee, created_by, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)",
        (
            &structure_id,
            structure_type.as_str(),
            &academic_year,
            &title,
            &description,
            &effective_date,
            grand_total,
            hostel_fee,
            &created_by,
            &now,
            &now,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "fee_structures" }),
        )
    })?;
    insert_semester_rows(&tx, &structure_id, &semesters)?;
    tx.commit().map_err(HandlerErr::db)?;

    Ok(json!({ "structureId": structure_id, "grandTotal": grand_total }))
}

fn structures_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let type_filter = match get_optional_str(params, "type")? {
        Some(raw) => {
            let Some(t) = FeeStructureType::parse(&raw) else {
                return Err(HandlerErr::with_details(
                    "bad_params",
                    "unknown fee structure type",
                    json!({ "type": raw }),
                ));
            };
            Some(t)
        }
        None => None,
    };
    let academic_year = get_optional_str(params, "academicYear")?;
    let is_active = get_optional_bool(params, "isActive")?;
    let search = get_optional_str(params, "search")?;
    let page = get_optional_i64(params, "page")?.unwrap_or(1).max(1);
    let limit = get_optional_i64(params, "limit")?.unwrap_or(20).clamp(1, 100);

    let mut filter_sql = String::from(" FROM fee_structures WHERE 1=1");
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(t) = type_filter {
        filter_sql.push_str(" AND structure_type = ?");
        binds.push(rusqlite::types::Value::Text(t.as_str().to_string()));
    }
    if let Some(y) = &academic_year {
        filter_sql.push_str(" AND academic_year = ?");
        binds.push(rusqlite::types::Value::Text(y.clone()));
    }
    if let Some(active) = is_active {
        filter_sql.push_str(" AND is_active = ?");
        binds.push(rusqlite::types::Value::Integer(if active { 1 } else { 0 }));
    }
    if let Some(s) = &search {
        filter_sql.push_str(" AND (title LIKE ? OR description LIKE ?)");
        let pattern = format!("%{}%", s);
        binds.push(rusqlite::types::Value::Text(pattern.clone()));
        binds.push(rusqlite::types::Value::Text(pattern));
    }

    let count_sql = format!("SELECT COUNT(*){}", filter_sql);
    let total_count: i64 = conn
        .query_row(
            &count_sql,
            rusqlite::params_from_iter(binds.iter().cloned()),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let page_sql = format!(
        "SELECT id, structure_type, academic_year, title, description, effective_date,
                is_active, grand_total, hostel_fee,
                (SELECT COUNT(*) FROM semester_fees sf WHERE sf.structure_id = fee_structures.id),
                created_by, created_at, updated_at
         {}
         ORDER BY academic_year DESC, title
         LIMIT ? OFFSET ?",
        filter_sql
    );
    binds.push(rusqlite::types::Value::Integer(limit));
    binds.push(rusqlite::types::Value::Integer((page - 1) * limit));

    let mut stmt = conn.prepare(&page_sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "type": r.get::<_, String>(1)?,
                "academicYear": r.get::<_, String>(2)?,
                "title": r.get::<_, String>(3)?,
                "description": r.get::<_, Option<String>>(4)?,
                "effectiveDate": r.get::<_, String>(5)?,
                "isActive": r.get::<_, i64>(6)? != 0,
                "grandTotal": r.get::<_, f64>(7)?,
                "hostelFee": r.get::<_, Option<f64>>(8)?,
                "semesterCount": r.get::<_, i64>(9)?,
                "createdBy": r.get::<_, String>(10)?,
                "createdAt": r.get::<_, String>(11)?,
                "updatedAt": r.get::<_, String>(12)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let total_pages = if total_count == 0 {
        0
    } else {
        (total_count + limit - 1) / limit
    };
    Ok(json!({
        "feeStructures": rows,
        "pagination": {
            "currentPage": page,
            "totalPages": total_pages,
            "totalCount": total_count,
            "hasNext": page < total_pages,
            "hasPrev": page > 1 && total_pages > 0
        }
    }))
}

fn structures_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let structure_id = get_required_str(params, "structureId")?;
    let Some(structure) = load_structure(conn, &structure_id)? else {
        return Err(HandlerErr::new("not_found", "fee structure not found"));
    };
    let value = serde_json::to_value(&structure)
        .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;
    Ok(json!({ "feeStructure": value }))
}

fn structures_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let structure_id = get_required_str(params, "structureId")?;
    if load_structure(conn, &structure_id)?.is_none() {
        return Err(HandlerErr::new("not_found", "fee structure not found"));
    }
    let patch = params
        .get("patch")
        .cloned()
        .ok_or_else(|| HandlerErr::new("bad_params", "missing patch object"))?;
    if !patch.is_object() {
        return Err(HandlerErr::new("bad_params", "patch must be an object"));
    }

    // The patch applies field by field; a rejected field must roll back
    // everything already applied, including the semester-table replace.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    if let Some(title) = get_optional_str(&patch, "title")? {
        tx.execute(
            "UPDATE fee_structures SET title = ? WHERE id = ?",
            (&title, &structure_id),
        )
        .map_err(HandlerErr::db)?;
    }
    if patch.get("description").is_some() {
        let description = get_optional_str(&patch, "description")?;
        tx.execute(
            "UPDATE fee_structures SET description = ? WHERE id = ?",
            (&description, &structure_id),
        )
        .map_err(HandlerErr::db)?;
    }
    if let Some(effective_date) = get_optional_str(&patch, "effectiveDate")? {
        tx.execute(
            "UPDATE fee_structures SET effective_date = ? WHERE id = ?",
            (&effective_date, &structure_id),
        )
        .map_err(HandlerErr::db)?;
    }
    if let Some(active) = get_optional_bool(&patch, "isActive")? {
        tx.execute(
            "UPDATE fee_structures SET is_active = ? WHERE id = ?",
            (if active { 1 } else { 0 }, &structure_id),
        )
        .map_err(HandlerErr::db)?;
    }
    if patch.get("hostelFee").is_some() {
        let hostel_fee = parse_hostel_fee(&patch)?;
        tx.execute(
            "UPDATE fee_structures SET hostel_fee = ? WHERE id = ?",
            (hostel_fee, &structure_id),
        )
        .map_err(HandlerErr::db)?;
    }
    if patch.get("semesters").is_some() {
        let (semesters, grand_total) = parse_semesters(&patch)?;
        tx.execute(
            "DELETE FROM semester_fees WHERE structure_id = ?",
            [&structure_id],
        )
        .map_err(HandlerErr::db)?;
        insert_semester_rows(&tx, &structure_id, &semesters)?;
        tx.execute(
            "UPDATE fee_structures SET grand_total = ? WHERE id = ?",
            (grand_total, &structure_id),
        )
        .map_err(HandlerErr::db)?;
    }

    tx.execute(
        "UPDATE fee_structures SET updated_at = ? WHERE id = ?",
        (now_ts(), &structure_id),
    )
    .map_err(HandlerErr::db)?;
    tx.commit().map_err(HandlerErr::db)?;

    Ok(json!({ "structureId": structure_id }))
}

fn structures_toggle_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let structure_id = get_required_str(params, "structureId")?;
    let changed = conn
        .execute(
            "UPDATE fee_structures SET is_active = 1 - is_active, updated_at = ? WHERE id = ?",
            (now_ts(), &structure_id),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "fee structure not found"));
    }
    let is_active: i64 = conn
        .query_row(
            "SELECT is_active FROM fee_structures WHERE id = ?",
            [&structure_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    Ok(json!({ "structureId": structure_id, "isActive": is_active != 0 }))
}

fn structures_clone(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let structure_id = get_required_str(params, "structureId")?;
    let new_academic_year = get_required_str(params, "newAcademicYear")?;
    let new_title = get_required_str(params, "newTitle")?;
    let cloned_by = get_optional_str(params, "clonedBy")?.unwrap_or_else(|| "admin".to_string());

    let Some(source) = load_structure(conn, &structure_id)? else {
        return Err(HandlerErr::new("not_found", "fee structure not found"));
    };

    let new_id = Uuid::new_v4().to_string();
    let now = now_ts();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    tx.execute(
        "INSERT INTO fee_structures(id, structure_type, academic_year, title, description,
             effective_date, is_active, grand_total, hostel_fee, created_by, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)",
        (
            &new_id,
            source.structure_type.as_str(),
            &new_academic_year,
            &new_title,
            &source.description,
            &source.effective_date,
            source.grand_total,
            source.hostel_fee,
            &cloned_by,
            &now,
            &now,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "fee_structures" }),
        )
    })?;
    insert_semester_rows(&tx, &new_id, &source.semesters)?;
    tx.commit().map_err(HandlerErr::db)?;

    Ok(json!({ "structureId": new_id, "clonedFrom": structure_id }))
}

fn structures_types(
    _conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut types = serde_json::Map::new();
    for t in FeeStructureType::ALL {
        types.insert(t.as_str().to_string(), json!(t.label()));
    }
    Ok(json!({ "types": types }))
}

fn structures_academic_years(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT academic_year FROM fee_structures ORDER BY academic_year DESC",
        )
        .map_err(HandlerErr::db)?;
    let years: Vec<String> = stmt
        .query_map([], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "academicYears": years }))
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
        "feeStructures.create" => Some(run(structures_create)),
        "feeStructures.list" => Some(run(structures_list)),
        "feeStructures.get" => Some(run(structures_get)),
        "feeStructures.update" => Some(run(structures_update)),
        "feeStructures.toggleStatus" => Some(run(structures_toggle_status)),
        "feeStructures.clone" => Some(run(structures_clone)),
        "feeStructures.types" => Some(run(structures_types)),
        "feeStructures.academicYears" => Some(run(structures_academic_years)),
        _ => None,
    }
}
