use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::ledger::{
    Customization, FeeComponent, FeeOverride, FeeStructure, FeeStructureType, SemesterFee,
};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn db(e: impl std::fmt::Display) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn require_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("{} must be string or null", key),
                ));
            };
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

pub fn get_optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            HandlerErr::new("bad_params", format!("{} must be an integer", key))
        }),
    }
}

pub fn get_optional_bool(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| {
            HandlerErr::new("bad_params", format!("{} must be a boolean", key))
        }),
    }
}

pub fn get_optional_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            HandlerErr::new("bad_params", format!("{} must be a number", key))
        }),
    }
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

/// Full template row with its semester components, in ascending order.
pub fn load_structure(
    conn: &Connection,
    structure_id: &str,
) -> Result<Option<FeeStructure>, HandlerErr> {
    let row: Option<(
        String,
        String,
        String,
        Option<String>,
        String,
        i64,
        f64,
        Option<f64>,
        String,
        String,
        String,
    )> = conn
        .query_row(
            "SELECT structure_type, academic_year, title, description, effective_date,
                    is_active, grand_total, hostel_fee, created_by, created_at, updated_at
             FROM fee_structures
             WHERE id = ?",
            [structure_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                    r.get(8)?,
                    r.get(9)?,
                    r.get(10)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;

    let Some((
        type_raw,
        academic_year,
        title,
        description,
        effective_date,
        is_active,
        grand_total,
        hostel_fee,
        created_by,
        created_at,
        updated_at,
    )) = row
    else {
        return Ok(None);
    };
    let Some(structure_type) = FeeStructureType::parse(&type_raw) else {
        return Err(HandlerErr::with_details(
            "corrupt_structure",
            format!("unknown structure type: {}", type_raw),
            json!({ "structureId": structure_id }),
        ));
    };

    let mut stmt = conn
        .prepare(
            "SELECT semester, semester_name, admission_fee, exam_permit_reg_fee, special_fee,
                    tuition_fee, fee_fund_charges, others, total
             FROM semester_fees
             WHERE structure_id = ?
             ORDER BY semester",
        )
        .map_err(HandlerErr::db)?;
    let semesters: Vec<SemesterFee> = stmt
        .query_map([structure_id], |r| {
            Ok(SemesterFee {
                semester: r.get(0)?,
                semester_name: r.get(1)?,
                fees: FeeComponent {
                    admission_fee: r.get(2)?,
                    exam_permit_reg_fee: r.get(3)?,
                    special_fee: r.get(4)?,
                    tuition_fee: r.get(5)?,
                    fee_fund_charges: r.get(6)?,
                    others: r.get(7)?,
                },
                total: r.get(8)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(Some(FeeStructure {
        id: structure_id.to_string(),
        structure_type,
        academic_year,
        title,
        description,
        effective_date,
        is_active: is_active != 0,
        semesters,
        grand_total,
        hostel_fee,
        created_by,
        created_at,
        updated_at,
    }))
}

/// The student's live (non-superseded) assignment, snapshot already decoded.
pub struct AssignmentRow {
    pub id: String,
    pub structure_id: String,
    pub snapshot: FeeStructure,
    pub notes: Option<String>,
    pub assigned_by: String,
    pub assigned_at: String,
}

pub fn load_current_assignment(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<AssignmentRow>, HandlerErr> {
    let row: Option<(String, String, String, Option<String>, String, String)> = conn
        .query_row(
            "SELECT id, structure_id, snapshot, notes, assigned_by, assigned_at
             FROM fee_assignments
             WHERE student_id = ? AND superseded = 0
             ORDER BY assigned_at DESC
             LIMIT 1",
            [student_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;

    let Some((id, structure_id, snapshot_raw, notes, assigned_by, assigned_at)) = row else {
        return Ok(None);
    };
    let snapshot: FeeStructure = serde_json::from_str(&snapshot_raw).map_err(|e| {
        HandlerErr::with_details(
            "corrupt_snapshot",
            e.to_string(),
            json!({ "assignmentId": id }),
        )
    })?;
    Ok(Some(AssignmentRow {
        id,
        structure_id,
        snapshot,
        notes,
        assigned_by,
        assigned_at,
    }))
}

/// Customizations in application (seq) order. The ledger relies on this
/// order for its last-write-wins overlay; never re-sort by timestamp.
pub fn load_customizations(
    conn: &Connection,
    assignment_id: &str,
) -> Result<Vec<Customization>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT semester, fees, reason, customized_by, customized_at
             FROM customizations
             WHERE assignment_id = ?
             ORDER BY seq",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([assignment_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut out = Vec::with_capacity(rows.len());
    for (semester, fees_raw, reason, customized_by, customized_at) in rows {
        let fees: FeeOverride = serde_json::from_str(&fees_raw)
            .map_err(|e| HandlerErr::new("corrupt_customization", e.to_string()))?;
        out.push(Customization {
            semester,
            fees,
            reason,
            customized_by,
            customized_at,
        });
    }
    Ok(out)
}
