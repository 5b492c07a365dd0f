use crate::ipc::helpers::{
    get_optional_str, get_required_str, now_ts, require_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplicationStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Waitlisted,
}

impl ApplicationStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Waitlisted => "waitlisted",
        }
    }

    fn parse(raw: &str) -> Option<ApplicationStatus> {
        match raw {
            "pending" => Some(ApplicationStatus::Pending),
            "under_review" => Some(ApplicationStatus::UnderReview),
            "approved" => Some(ApplicationStatus::Approved),
            "rejected" => Some(ApplicationStatus::Rejected),
            "waitlisted" => Some(ApplicationStatus::Waitlisted),
            _ => None,
        }
    }
}

fn application_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "applicantName": r.get::<_, String>(1)?,
        "email": r.get::<_, String>(2)?,
        "course": r.get::<_, String>(3)?,
        "status": r.get::<_, String>(4)?,
        "admissionNumber": r.get::<_, Option<String>>(5)?,
        "notes": r.get::<_, Option<String>>(6)?,
        "submittedAt": r.get::<_, String>(7)?,
        "updatedAt": r.get::<_, String>(8)?
    }))
}

fn applications_submit(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let applicant_name = get_required_str(params, "applicantName")?;
    let email = get_required_str(params, "email")?;
    let course = get_required_str(params, "course")?;
    let notes = get_optional_str(params, "notes")?;

    let application_id = Uuid::new_v4().to_string();
    let now = now_ts();
    conn.execute(
        "INSERT INTO applications(id, applicant_name, email, course, status, admission_number,
             notes, submitted_at, updated_at)
         VALUES(?, ?, ?, ?, 'pending', NULL, ?, ?, ?)",
        (
            &application_id,
            &applicant_name,
            &email,
            &course,
            &notes,
            &now,
            &now,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "applications" }),
        )
    })?;

    Ok(json!({ "applicationId": application_id, "status": "pending" }))
}

fn applications_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let status_filter = match get_optional_str(params, "status")? {
        Some(raw) => {
            let Some(s) = ApplicationStatus::parse(&raw) else {
                return Err(HandlerErr::with_details(
                    "bad_params",
                    "unknown application status",
                    json!({ "status": raw }),
                ));
            };
            Some(s)
        }
        None => None,
    };
    let search = get_optional_str(params, "search")?;

    let mut sql = String::from(
        "SELECT id, applicant_name, email, course, status, admission_number, notes,
                submitted_at, updated_at
         FROM applications WHERE 1=1",
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(s) = status_filter {
        sql.push_str(" AND status = ?");
        binds.push(s.as_str().to_string());
    }
    if let Some(s) = &search {
        sql.push_str(" AND (applicant_name LIKE ? OR email LIKE ?)");
        let pattern = format!("%{}%", s);
        binds.push(pattern.clone());
        binds.push(pattern);
    }
    sql.push_str(" ORDER BY submitted_at, id");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            application_row_json(r)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "applications": rows }))
}

fn applications_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let application_id = get_required_str(params, "applicationId")?;
    let row = conn
        .query_row(
            "SELECT id, applicant_name, email, course, status, admission_number, notes,
                    submitted_at, updated_at
             FROM applications WHERE id = ?",
            [&application_id],
            |r| application_row_json(r),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(application) = row else {
        return Err(HandlerErr::new("not_found", "application not found"));
    };
    Ok(json!({ "application": application }))
}

fn applications_update_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let application_id = get_required_str(params, "applicationId")?;
    let to_raw = get_required_str(params, "status")?;
    let Some(to_status) = ApplicationStatus::parse(&to_raw) else {
        return Err(HandlerErr::with_details(
            "bad_params",
            "unknown application status",
            json!({ "status": to_raw }),
        ));
    };
    let changed_by =
        get_optional_str(params, "changedBy")?.unwrap_or_else(|| "admin".to_string());
    let reason = get_optional_str(params, "reason")?
        .unwrap_or_else(|| format!("Application status updated to {}", to_status.as_str()));

    let from_raw: Option<String> = conn
        .query_row(
            "SELECT status FROM applications WHERE id = ?",
            [&application_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(from_raw) = from_raw else {
        return Err(HandlerErr::new("not_found", "application not found"));
    };

    // Once approved, an application is locked; corrections go through an
    // administrator, not this endpoint.
    if from_raw == ApplicationStatus::Approved.as_str() {
        return Err(HandlerErr::new(
            "application_locked",
            "application status cannot be changed once approved",
        ));
    }

    // Approval hands out the admission number, so it must arrive with it.
    let admission_number = get_optional_str(params, "admissionNumber")?;
    if to_status == ApplicationStatus::Approved && admission_number.is_none() {
        return Err(HandlerErr::new(
            "bad_params",
            "approval requires an admissionNumber",
        ));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db)?;
    if let Some(n) = &admission_number {
        tx.execute(
            "UPDATE applications SET status = ?, admission_number = ?, updated_at = ? WHERE id = ?",
            (to_status.as_str(), n, now_ts(), &application_id),
        )
        .map_err(HandlerErr::db)?;
    } else {
        tx.execute(
            "UPDATE applications SET status = ?, updated_at = ? WHERE id = ?",
            (to_status.as_str(), now_ts(), &application_id),
        )
        .map_err(HandlerErr::db)?;
    }
    tx.execute(
        "INSERT INTO application_status_log(id, application_id, from_status, to_status,
             reason, changed_by, changed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &application_id,
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
            json!({ "table": "application_status_log" }),
        )
    })?;
    tx.commit().map_err(HandlerErr::db)?;

    Ok(json!({
        "applicationId": application_id,
        "fromStatus": from_raw,
        "toStatus": to_status.as_str()
    }))
}

fn applications_status_log(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let application_id = get_required_str(params, "applicationId")?;
    let mut stmt = conn
        .prepare(
            "SELECT from_status, to_status, reason, changed_by, changed_at
             FROM application_status_log
             WHERE application_id = ?
             ORDER BY changed_at, id",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&application_id], |r| {
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
        "applications.submit" => Some(run(applications_submit)),
        "applications.list" => Some(run(applications_list)),
        "applications.get" => Some(run(applications_get)),
        "applications.updateStatus" => Some(run(applications_update_status)),
        "applications.statusLog" => Some(run(applications_status_log)),
        _ => None,
    }
}
