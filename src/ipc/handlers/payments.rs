use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_str, load_current_assignment, now_ts,
    require_conn, student_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::PaymentStatus;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn payments_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let amount_paid = params
        .get("amountPaid")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing amountPaid"))?;
    if !amount_paid.is_finite() || amount_paid <= 0.0 {
        return Err(HandlerErr::new(
            "invalid_fee_value",
            "amountPaid must be a positive number",
        ));
    }

    let semester = get_optional_i64(params, "semester")?;
    if let Some(s) = semester {
        if s < 1 {
            return Err(HandlerErr::new(
                "bad_params",
                "semester numbers are 1-based positive integers",
            ));
        }
    }

    // Manual desk entries default to completed; gateway flows pass the
    // status they are in.
    let status = match get_optional_str(params, "paymentStatus")? {
        Some(raw) => PaymentStatus::parse(&raw).ok_or_else(|| {
            HandlerErr::with_details(
                "bad_params",
                "unknown payment status",
                json!({ "paymentStatus": raw }),
            )
        })?,
        None => PaymentStatus::Completed,
    };

    let payment_method = get_required_str(params, "paymentMethod")?;
    let payment_date = get_optional_str(params, "paymentDate")?.unwrap_or_else(now_ts);
    let academic_year = get_optional_str(params, "academicYear")?;
    let receipt_number = get_optional_str(params, "receiptNumber")?;
    let transaction_id = get_optional_str(params, "transactionId")?;
    let notes = get_optional_str(params, "notes")?;
    let recorded_by =
        get_optional_str(params, "recordedBy")?.unwrap_or_else(|| "admin".to_string());

    // The ledger only books a payment against a semester it knows about.
    // Accept the record either way but warn when it will not reduce a due.
    // Resolved before the insert so a failed lookup cannot produce an error
    // envelope for a payment that was already written.
    let mut warning: Option<String> = None;
    if let Some(s) = semester {
        let known = load_current_assignment(conn, &student_id)?
            .map(|a| a.snapshot.semesters.iter().any(|sem| sem.semester == s))
            .unwrap_or(false);
        if !known {
            warning = Some(format!(
                "semester {} is not present in the student's assigned fee structure",
                s
            ));
        }
    }

    let payment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO payments(id, student_id, semester, amount_paid, payment_status,
             payment_method, payment_date, academic_year, receipt_number, transaction_id,
             notes, recorded_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &payment_id,
            &student_id,
            semester,
            amount_paid,
            status.as_str(),
            &payment_method,
            &payment_date,
            &academic_year,
            &receipt_number,
            &transaction_id,
            &notes,
            &recorded_by,
            now_ts(),
        ],
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "payments" }),
        )
    })?;

    let mut result = json!({ "paymentId": payment_id });
    if let Some(w) = warning {
        result["warning"] = json!(w);
    }
    Ok(result)
}

fn payment_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "semester": r.get::<_, Option<i64>>(2)?,
        "amountPaid": r.get::<_, f64>(3)?,
        "paymentStatus": r.get::<_, String>(4)?,
        "paymentMethod": r.get::<_, String>(5)?,
        "paymentDate": r.get::<_, String>(6)?,
        "academicYear": r.get::<_, Option<String>>(7)?,
        "receiptNumber": r.get::<_, Option<String>>(8)?,
        "transactionId": r.get::<_, Option<String>>(9)?,
        "notes": r.get::<_, Option<String>>(10)?,
        "recordedBy": r.get::<_, String>(11)?,
        "createdAt": r.get::<_, String>(12)?
    }))
}

fn payments_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let status_filter = match get_optional_str(params, "status")? {
        Some(raw) => {
            let Some(s) = PaymentStatus::parse(&raw) else {
                return Err(HandlerErr::with_details(
                    "bad_params",
                    "unknown payment status",
                    json!({ "status": raw }),
                ));
            };
            Some(s)
        }
        None => None,
    };
    let semester = get_optional_i64(params, "semester")?;

    let mut sql = String::from(
        "SELECT id, student_id, semester, amount_paid, payment_status, payment_method,
                payment_date, academic_year, receipt_number, transaction_id, notes,
                recorded_by, created_at
         FROM payments WHERE student_id = ?",
    );
    let mut binds: Vec<rusqlite::types::Value> =
        vec![rusqlite::types::Value::Text(student_id.clone())];
    if let Some(s) = status_filter {
        sql.push_str(" AND payment_status = ?");
        binds.push(rusqlite::types::Value::Text(s.as_str().to_string()));
    }
    if let Some(s) = semester {
        sql.push_str(" AND semester = ?");
        binds.push(rusqlite::types::Value::Integer(s));
    }
    sql.push_str(" ORDER BY created_at, id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| payment_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "payments": rows }))
}

fn payments_update_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let to_raw = get_required_str(params, "paymentStatus")?;
    let Some(to_status) = PaymentStatus::parse(&to_raw) else {
        return Err(HandlerErr::with_details(
            "bad_params",
            "unknown payment status",
            json!({ "paymentStatus": to_raw }),
        ));
    };
    let changed_by =
        get_optional_str(params, "changedBy")?.unwrap_or_else(|| "admin".to_string());
    let reason = get_optional_str(params, "reason")?
        .unwrap_or_else(|| format!("Payment status updated to {}", to_status.as_str()));

    let from_raw: Option<String> = conn
        .query_row(
            "SELECT payment_status FROM payments WHERE id = ?",
            [&payment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(from_raw) = from_raw else {
        return Err(HandlerErr::new("not_found", "payment not found"));
    };

    // Status flip and its log entry land together or not at all.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    tx.execute(
        "UPDATE payments SET payment_status = ? WHERE id = ?",
        (to_status.as_str(), &payment_id),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "payments" }),
        )
    })?;
    tx.execute(
        "INSERT INTO payment_status_log(id, payment_id, from_status, to_status, reason,
             changed_by, changed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &payment_id,
            &from_raw,
            to_status.as_str(),
            &reason,
            &changed_by,
            now_ts(),
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "payment_status_log" }),
        )
    })?;
    tx.commit().map_err(HandlerErr::db)?;

    Ok(json!({
        "paymentId": payment_id,
        "fromStatus": from_raw,
        "toStatus": to_status.as_str()
    }))
}

fn payments_status_log(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let payment_id = get_required_str(params, "paymentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT from_status, to_status, reason, changed_by, changed_at
             FROM payment_status_log
             WHERE payment_id = ?
             ORDER BY changed_at, id",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&payment_id], |r| {
            Ok(json!({
                "fromStatus": r.get::<_, String>(0)?,
                "toStatus": r.get::<_, String>(1)?,
                "reason": r.get::<_, String>(2)?,
                "changedBy": r.get::<_, String>(3)?,
                "changedAt": r.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "statusLog": rows }))
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
        "payments.record" => Some(run(payments_record)),
        "payments.list" => Some(run(payments_list)),
        "payments.updateStatus" => Some(run(payments_update_status)),
        "payments.statusLog" => Some(run(payments_status_log)),
        _ => None,
    }
}
