use serde::{Deserialize, Serialize};

/// Named fee line items for one semester. Amounts are rupees; the backend
/// stores them as plain numbers, so `f64` round-trips the wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeComponent {
    pub admission_fee: f64,
    pub exam_permit_reg_fee: f64,
    pub special_fee: f64,
    pub tuition_fee: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_fund_charges: Option<f64>,
    pub others: f64,
}

/// Partial fee component carried by a customization: only the overridden
/// keys are present.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeeOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_fee: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_permit_reg_fee: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_fee: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuition_fee: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_fund_charges: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub others: Option<f64>,
}

impl FeeOverride {
    pub fn is_empty(&self) -> bool {
        self.admission_fee.is_none()
            && self.exam_permit_reg_fee.is_none()
            && self.special_fee.is_none()
            && self.tuition_fee.is_none()
            && self.fee_fund_charges.is_none()
            && self.others.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterFee {
    pub semester: i64,
    pub semester_name: String,
    pub fees: FeeComponent,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStructureType {
    Regular,
    LateralEntry,
    Evening,
    TfwRegular,
    TfwLet,
    InterState,
}

impl FeeStructureType {
    pub const ALL: [FeeStructureType; 6] = [
        FeeStructureType::Regular,
        FeeStructureType::LateralEntry,
        FeeStructureType::Evening,
        FeeStructureType::TfwRegular,
        FeeStructureType::TfwLet,
        FeeStructureType::InterState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeStructureType::Regular => "regular",
            FeeStructureType::LateralEntry => "lateral_entry",
            FeeStructureType::Evening => "evening",
            FeeStructureType::TfwRegular => "tfw_regular",
            FeeStructureType::TfwLet => "tfw_let",
            FeeStructureType::InterState => "inter_state",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeeStructureType::Regular => "Regular Batch",
            FeeStructureType::LateralEntry => "Lateral Entry (LET)",
            FeeStructureType::Evening => "Evening Batch",
            FeeStructureType::TfwRegular => "TFW Regular",
            FeeStructureType::TfwLet => "TFW LET",
            FeeStructureType::InterState => "Inter State",
        }
    }

    pub fn parse(raw: &str) -> Option<FeeStructureType> {
        FeeStructureType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == raw)
    }
}

/// A fee-structure template, and also the shape frozen into an assignment
/// snapshot. `grandTotal` excludes `hostelFee`; it is always recomputed
/// from the semester components, never trusted from input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStructure {
    pub id: String,
    #[serde(rename = "type")]
    pub structure_type: FeeStructureType,
    pub academic_year: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub effective_date: String,
    pub is_active: bool,
    pub semesters: Vec<SemesterFee>,
    pub grand_total: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostel_fee: Option<f64>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One admin-authored override of specific fee fields for one semester of
/// one student's assignment. Append-only; corrections are new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    pub semester: i64,
    pub fees: FeeOverride,
    pub reason: String,
    pub customized_by: String,
    pub customized_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(raw: &str) -> Option<PaymentStatus> {
        match raw {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

/// The slice of a payment record the ledger cares about. Callers map their
/// richer rows down to this before computing dues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaymentPosting {
    pub semester: Option<i64>,
    pub amount_paid: f64,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemesterStatus {
    Unpaid,
    PartiallyPaid,
    FullyPaid,
}

impl SemesterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemesterStatus::Unpaid => "unpaid",
            SemesterStatus::PartiallyPaid => "partially_paid",
            SemesterStatus::FullyPaid => "fully_paid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterDue {
    pub semester: i64,
    pub semester_name: String,
    pub total_due: f64,
    pub total_paid: f64,
    pub outstanding: f64,
    pub payment_status: SemesterStatus,
    pub percent_paid: f64,
    pub fee_breakdown: FeeComponent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    pub total_amount_due: f64,
    pub total_amount_paid: f64,
    pub total_outstanding: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostel_fee: Option<f64>,
    pub completed_payments: i64,
    pub pending_payments: i64,
    pub failed_payments: i64,
    pub refunded_payments: i64,
}

pub fn component_total(fees: &FeeComponent) -> f64 {
    fees.admission_fee
        + fees.exam_permit_reg_fee
        + fees.special_fee
        + fees.tuition_fee
        + fees.fee_fund_charges.unwrap_or(0.0)
        + fees.others
}

/// Resolve one semester's fees by folding the customization list over the
/// template component. Overrides apply in list order, field by field, so a
/// later customization wins per field while fields it does not touch keep
/// the value set by an earlier one. Applied values are floored at zero; a
/// negative override can never produce a negative effective fee.
pub fn effective_fees(semester: &SemesterFee, customizations: &[Customization]) -> FeeComponent {
    let mut fees = semester.fees;
    for c in customizations {
        if c.semester != semester.semester {
            continue;
        }
        if let Some(v) = c.fees.admission_fee {
            fees.admission_fee = v.max(0.0);
        }
        if let Some(v) = c.fees.exam_permit_reg_fee {
            fees.exam_permit_reg_fee = v.max(0.0);
        }
        if let Some(v) = c.fees.special_fee {
            fees.special_fee = v.max(0.0);
        }
        if let Some(v) = c.fees.tuition_fee {
            fees.tuition_fee = v.max(0.0);
        }
        if let Some(v) = c.fees.fee_fund_charges {
            fees.fee_fund_charges = Some(v.max(0.0));
        }
        if let Some(v) = c.fees.others {
            fees.others = v.max(0.0);
        }
    }
    fees
}

pub fn effective_total(semester: &SemesterFee, customizations: &[Customization]) -> f64 {
    component_total(&effective_fees(semester, customizations))
}

/// Percent of a due amount covered by payments, rounded to a whole number.
/// A zero-due semester reads as fully covered rather than dividing by zero.
pub fn percent_paid(total_due: f64, total_paid: f64) -> f64 {
    if total_due <= 0.0 {
        return 100.0;
    }
    (100.0 * total_paid / total_due).round()
}

fn classify(total_due: f64, total_paid: f64) -> SemesterStatus {
    if total_paid == 0.0 {
        // Note: a free semester (0 due, 0 paid) also lands here.
        SemesterStatus::Unpaid
    } else if total_paid >= total_due {
        SemesterStatus::FullyPaid
    } else {
        SemesterStatus::PartiallyPaid
    }
}

/// Dues for one semester: effective total minus completed payments booked
/// against that semester. Pending/failed/refunded payments never move the
/// numbers; refund arithmetic is a backend concern.
pub fn semester_due(
    semester: &SemesterFee,
    customizations: &[Customization],
    payments: &[PaymentPosting],
) -> SemesterDue {
    let fee_breakdown = effective_fees(semester, customizations);
    let total_due = component_total(&fee_breakdown);
    let total_paid: f64 = payments
        .iter()
        .filter(|p| p.semester == Some(semester.semester) && p.status == PaymentStatus::Completed)
        .map(|p| p.amount_paid)
        .sum();
    let outstanding = (total_due - total_paid).max(0.0);

    SemesterDue {
        semester: semester.semester,
        semester_name: semester.semester_name.clone(),
        total_due,
        total_paid,
        outstanding,
        payment_status: classify(total_due, total_paid),
        percent_paid: percent_paid(total_due, total_paid),
        fee_breakdown,
    }
}

/// Per-semester dues in snapshot order. A payment or customization that
/// references a semester absent from the snapshot simply never matches;
/// the ledger is a permissive reader over already-accepted inputs.
pub fn assignment_dues(
    snapshot: &FeeStructure,
    customizations: &[Customization],
    payments: &[PaymentPosting],
) -> Vec<SemesterDue> {
    snapshot
        .semesters
        .iter()
        .map(|s| semester_due(s, customizations, payments))
        .collect()
}

/// Aggregate view across all semesters. `hostelFee` is reported alongside
/// the totals but is never folded into due/outstanding.
pub fn grand_summary(
    snapshot: &FeeStructure,
    customizations: &[Customization],
    payments: &[PaymentPosting],
) -> LedgerSummary {
    let dues = assignment_dues(snapshot, customizations, payments);
    let total_amount_due: f64 = dues.iter().map(|d| d.total_due).sum();
    let total_amount_paid: f64 = dues.iter().map(|d| d.total_paid).sum();
    let total_outstanding: f64 = dues.iter().map(|d| d.outstanding).sum();

    let mut completed_payments = 0_i64;
    let mut pending_payments = 0_i64;
    let mut failed_payments = 0_i64;
    let mut refunded_payments = 0_i64;
    for p in payments {
        match p.status {
            PaymentStatus::Completed => completed_payments += 1,
            PaymentStatus::Pending | PaymentStatus::Processing => pending_payments += 1,
            PaymentStatus::Failed => failed_payments += 1,
            PaymentStatus::Refunded => refunded_payments += 1,
        }
    }

    LedgerSummary {
        total_amount_due,
        total_amount_paid,
        total_outstanding,
        hostel_fee: snapshot.hostel_fee,
        completed_payments,
        pending_payments,
        failed_payments,
        refunded_payments,
    }
}

/// Recompute every semester `total` and return the grand total (hostel fee
/// excluded). Used wherever a template or snapshot is written so stored
/// totals can never drift from their components.
pub fn recompute_totals(semesters: &mut [SemesterFee]) -> f64 {
    let mut grand_total = 0.0;
    for s in semesters.iter_mut() {
        s.total = component_total(&s.fees);
        grand_total += s.total;
    }
    grand_total
}

/// First fee field holding a negative or non-finite value, if any.
pub fn invalid_component_field(fees: &FeeComponent) -> Option<&'static str> {
    let checks: [(&'static str, Option<f64>); 6] = [
        ("admissionFee", Some(fees.admission_fee)),
        ("examPermitRegFee", Some(fees.exam_permit_reg_fee)),
        ("specialFee", Some(fees.special_fee)),
        ("tuitionFee", Some(fees.tuition_fee)),
        ("feeFundCharges", fees.fee_fund_charges),
        ("others", Some(fees.others)),
    ];
    bad_field(&checks)
}

/// Same check over a partial override.
pub fn invalid_override_field(fees: &FeeOverride) -> Option<&'static str> {
    let checks: [(&'static str, Option<f64>); 6] = [
        ("admissionFee", fees.admission_fee),
        ("examPermitRegFee", fees.exam_permit_reg_fee),
        ("specialFee", fees.special_fee),
        ("tuitionFee", fees.tuition_fee),
        ("feeFundCharges", fees.fee_fund_charges),
        ("others", fees.others),
    ];
    bad_field(&checks)
}

fn bad_field(checks: &[(&'static str, Option<f64>)]) -> Option<&'static str> {
    for (name, value) in checks {
        if let Some(v) = value {
            if !v.is_finite() || *v < 0.0 {
                return Some(name);
            }
        }
    }
    None
}
