use crate::ipc::helpers::{
    get_optional_str, get_required_str, load_current_assignment, load_customizations,
    load_structure, now_ts, require_conn, student_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, FeeOverride};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn assignments_assign(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let structure_id = get_required_str(params, "structureId")?;
    let notes = get_optional_str(params, "notes")?;
    let assigned_by =
        get_optional_str(params, "assignedBy")?.unwrap_or_else(|| "admin".to_string());

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let Some(mut structure) = load_structure(conn, &structure_id)? else {
        return Err(HandlerErr::new("not_found", "fee structure not found"));
    };
    if !structure.is_active {
        return Err(HandlerErr::new(
            "structure_inactive",
            "cannot assign an inactive fee structure",
        ));
    }

    // Freeze the template as of now. Totals are recomputed before the copy
    // so the snapshot is internally consistent even if stored rows drifted.
    structure.grand_total = ledger::recompute_totals(&mut structure.semesters);
    let snapshot = serde_json::to_string(&structure)
        .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;

    // A re-assignment supersedes; prior assignments stay for audit. The
    // supersede and the new row commit together so the student can never be
    // left with no live assignment.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    tx.execute(
        "UPDATE fee_assignments SET superseded = 1 WHERE student_id = ? AND superseded = 0",
        [&student_id],
    )
    .map_err(HandlerErr::db)?;

    let assignment_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO fee_assignments(id, student_id, structure_id, snapshot, notes,
             superseded, assigned_by, assigned_at)
         VALUES(?, ?, ?, ?, ?, 0, ?, ?)",
        (
            &assignment_id,
            &student_id,
            &structure_id,
            &snapshot,
            &notes,
            &assigned_by,
            now_ts(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "fee_assignments" }),
        )
    })?;
    tx.commit().map_err(HandlerErr::db)?;

    Ok(json!({
        "assignmentId": assignment_id,
        "grandTotal": structure.grand_total
    }))
}

fn assignments_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(assignment) = load_current_assignment(conn, &student_id)? else {
        return Ok(json!({ "assignment": null }));
    };
    let customizations = load_customizations(conn, &assignment.id)?;

    let snapshot = serde_json::to_value(&assignment.snapshot)
        .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;
    let customizations = serde_json::to_value(&customizations)
        .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;

    Ok(json!({
        "assignment": {
            "id": assignment.id,
            "studentId": student_id,
            "structureId": assignment.structure_id,
            "feeStructureSnapshot": snapshot,
            "customizations": customizations,
            "notes": assignment.notes,
            "assignedBy": assignment.assigned_by,
            "assignedAt": assignment.assigned_at
        }
    }))
}

fn assignments_customize(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let semester = params
        .get("semester")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing semester"))?;
    if semester < 1 {
        return Err(HandlerErr::new(
            "bad_params",
            "semester numbers are 1-based positive integers",
        ));
    }
    let reason = get_required_str(params, "reason")?;
    let customized_by =
        get_optional_str(params, "customizedBy")?.unwrap_or_else(|| "admin".to_string());

    let fees_raw = params
        .get("fees")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing fees"))?;
    let fees: FeeOverride = serde_json::from_value(fees_raw.clone())
        .map_err(|e| HandlerErr::new("bad_params", format!("fees: {}", e)))?;
    if fees.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            "fees must override at least one field",
        ));
    }
    if let Some(field) = ledger::invalid_override_field(&fees) {
        return Err(HandlerErr::with_details(
            "invalid_fee_value",
            "fee overrides must be non-negative numbers",
            json!({ "field": field }),
        ));
    }

    let Some(assignment) = load_current_assignment(conn, &student_id)? else {
        return Err(HandlerErr::new(
            "not_found",
            "student has no fee structure assigned",
        ));
    };

    let seq: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM customizations WHERE assignment_id = ?",
            [&assignment.id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;

    let fees_json = serde_json::to_string(&fees)
        .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;
    let customization_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO customizations(id, assignment_id, seq, semester, fees, reason,
             customized_by, customized_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &customization_id,
            &assignment.id,
            seq,
            semester,
            &fees_json,
            &reason,
            &customized_by,
            now_ts(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "customizations" }),
        )
    })?;

    // The ledger ignores a customization whose semester is not in the
    // snapshot; accept it but tell the caller it will not take effect.
    let known = assignment
        .snapshot
        .semesters
        .iter()
        .any(|s| s.semester == semester);
    let mut result = json!({ "customizationId": customization_id, "seq": seq });
    if !known {
        result["warning"] = json!(format!(
            "semester {} is not present in the assigned fee structure",
            semester
        ));
    }
    Ok(result)
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
        "feeAssignments.assign" => Some(run(assignments_assign)),
        "feeAssignments.get" => Some(run(assignments_get)),
        "feeAssignments.customize" => Some(run(assignments_customize)),
        _ => None,
    }
}
