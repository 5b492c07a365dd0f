use crate::ipc::helpers::{
    get_required_str, load_current_assignment, load_customizations, require_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, PaymentPosting, PaymentStatus};
use rusqlite::Connection;
use serde_json::json;

/// Every payment row for the student, reduced to what the ledger needs.
/// Rows with a status the ledger does not know are skipped rather than
/// failing the whole read.
fn load_postings(conn: &Connection, student_id: &str) -> Result<Vec<PaymentPosting>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT semester, amount_paid, payment_status
             FROM payments
             WHERE student_id = ?
             ORDER BY created_at, id",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, Option<i64>>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut postings = Vec::with_capacity(rows.len());
    for (semester, amount_paid, status_raw) in rows {
        let Some(status) = PaymentStatus::parse(&status_raw) else {
            continue;
        };
        postings.push(PaymentPosting {
            semester,
            amount_paid,
            status,
        });
    }
    Ok(postings)
}

fn dues_semester_dues(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(assignment) = load_current_assignment(conn, &student_id)? else {
        // Partial inputs are fine: no assignment reads as no dues.
        return Ok(json!({ "semesterDues": [] }));
    };
    let customizations = load_customizations(conn, &assignment.id)?;
    let postings = load_postings(conn, &student_id)?;

    let dues = ledger::assignment_dues(&assignment.snapshot, &customizations, &postings);
    let dues = serde_json::to_value(&dues)
        .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;
    Ok(json!({ "semesterDues": dues }))
}

fn dues_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let postings = load_postings(conn, &student_id)?;

    let Some(assignment) = load_current_assignment(conn, &student_id)? else {
        let mut completed = 0_i64;
        let mut pending = 0_i64;
        let mut failed = 0_i64;
        let mut refunded = 0_i64;
        for p in &postings {
            match p.status {
                PaymentStatus::Completed => completed += 1,
                PaymentStatus::Pending | PaymentStatus::Processing => pending += 1,
                PaymentStatus::Failed => failed += 1,
                PaymentStatus::Refunded => refunded += 1,
            }
        }
        return Ok(json!({
            "summary": {
                "totalAmountDue": 0.0,
                "totalAmountPaid": 0.0,
                "totalOutstanding": 0.0,
                "completedPayments": completed,
                "pendingPayments": pending,
                "failedPayments": failed,
                "refundedPayments": refunded
            },
            "semesterDues": []
        }));
    };
    let customizations = load_customizations(conn, &assignment.id)?;

    let summary = ledger::grand_summary(&assignment.snapshot, &customizations, &postings);
    let dues = ledger::assignment_dues(&assignment.snapshot, &customizations, &postings);

    let summary = serde_json::to_value(&summary)
        .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;
    let dues = serde_json::to_value(&dues)
        .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;
    Ok(json!({ "summary": summary, "semesterDues": dues }))
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
        "ledger.semesterDues" => Some(run(dues_semester_dues)),
        "ledger.summary" => Some(run(dues_summary)),
        _ => None,
    }
}
