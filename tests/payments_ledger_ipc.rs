use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_feeledgerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn feeledgerd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

struct Harness {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u32,
    student_id: String,
}

impl Harness {
    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let payload = json!({
            "id": self.next_id.to_string(),
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn dues(&mut self) -> Vec<serde_json::Value> {
        let student_id = self.student_id.clone();
        self.call("ledger.semesterDues", json!({ "studentId": student_id }))
            .get("semesterDues")
            .and_then(|v| v.as_array())
            .cloned()
            .expect("semesterDues")
    }

    fn record(&mut self, semester: i64, amount: f64, status: &str) -> String {
        let student_id = self.student_id.clone();
        self.call(
            "payments.record",
            json!({
                "studentId": student_id,
                "semester": semester,
                "amountPaid": amount,
                "paymentMethod": "cash",
                "paymentStatus": status,
                "recordedBy": "cashier@college.test"
            }),
        )
        .get("paymentId")
        .and_then(|v| v.as_str())
        .expect("paymentId")
        .to_string()
    }
}

fn setup(workspace: &PathBuf) -> Harness {
    let (child, stdin, reader) = spawn_sidecar();
    let mut h = Harness {
        _child: child,
        stdin,
        reader,
        next_id: 0,
        student_id: String::new(),
    };
    let _ = h.call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = h.call(
        "students.create",
        json!({ "name": "Rahul Menon", "email": "rahul@college.test" }),
    );
    h.student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let structure = h.call(
        "feeStructures.create",
        json!({
            "type": "regular",
            "academicYear": "2025-26",
            "title": "BTech Regular 2025-26",
            "effectiveDate": "2025-06-01",
            "hostelFee": 30000,
            "semesters": [
                {
                    "semester": 1,
                    "semesterName": "Semester 1",
                    "fees": {
                        "admissionFee": 5000,
                        "examPermitRegFee": 2025,
                        "specialFee": 2500,
                        "tuitionFee": 17500,
                        "others": 0
                    }
                },
                {
                    "semester": 2,
                    "semesterName": "Semester 2",
                    "fees": {
                        "admissionFee": 0,
                        "examPermitRegFee": 2025,
                        "specialFee": 2500,
                        "tuitionFee": 17500,
                        "others": 0
                    }
                }
            ]
        }),
    );
    let structure_id = structure
        .get("structureId")
        .and_then(|v| v.as_str())
        .expect("structureId")
        .to_string();
    let student_id = h.student_id.clone();
    let _ = h.call(
        "feeAssignments.assign",
        json!({ "studentId": student_id, "structureId": structure_id }),
    );
    h
}

#[test]
fn completed_payments_move_the_ledger_and_pending_do_not() {
    let workspace = temp_dir("feeledger-payments");
    let mut h = setup(&workspace);

    let dues = h.dues();
    assert_eq!(dues.len(), 2);
    assert_eq!(dues[0].get("totalDue").and_then(|v| v.as_f64()), Some(27025.0));
    assert_eq!(
        dues[0].get("paymentStatus").and_then(|v| v.as_str()),
        Some("unpaid")
    );

    let _ = h.record(1, 10000.0, "completed");
    let dues = h.dues();
    assert_eq!(dues[0].get("totalPaid").and_then(|v| v.as_f64()), Some(10000.0));
    assert_eq!(
        dues[0].get("outstanding").and_then(|v| v.as_f64()),
        Some(17025.0)
    );
    assert_eq!(
        dues[0].get("paymentStatus").and_then(|v| v.as_str()),
        Some("partially_paid")
    );
    assert_eq!(dues[0].get("percentPaid").and_then(|v| v.as_f64()), Some(37.0));

    // A pending gateway payment is visible in history but does not reduce
    // the due until it completes.
    let pending_id = h.record(1, 5000.0, "pending");
    let dues = h.dues();
    assert_eq!(dues[0].get("totalPaid").and_then(|v| v.as_f64()), Some(10000.0));

    let updated = h.call(
        "payments.updateStatus",
        json!({
            "paymentId": pending_id,
            "paymentStatus": "completed",
            "reason": "bank confirmed the transfer",
            "changedBy": "cashier@college.test"
        }),
    );
    assert_eq!(updated.get("fromStatus").and_then(|v| v.as_str()), Some("pending"));
    assert_eq!(updated.get("toStatus").and_then(|v| v.as_str()), Some("completed"));

    let dues = h.dues();
    assert_eq!(dues[0].get("totalPaid").and_then(|v| v.as_f64()), Some(15000.0));
    assert_eq!(
        dues[0].get("outstanding").and_then(|v| v.as_f64()),
        Some(12025.0)
    );

    let log = h.call("payments.statusLog", json!({ "paymentId": pending_id }));
    let entries = log
        .get("statusLog")
        .and_then(|v| v.as_array())
        .expect("statusLog");
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].get("reason").and_then(|v| v.as_str()),
        Some("bank confirmed the transfer")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn full_payment_and_overpayment_clamp_at_zero_outstanding() {
    let workspace = temp_dir("feeledger-payments-full");
    let mut h = setup(&workspace);

    let _ = h.record(1, 27025.0, "completed");
    let dues = h.dues();
    assert_eq!(dues[0].get("outstanding").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(
        dues[0].get("paymentStatus").and_then(|v| v.as_str()),
        Some("fully_paid")
    );
    // Semester 2 is untouched.
    assert_eq!(
        dues[1].get("paymentStatus").and_then(|v| v.as_str()),
        Some("unpaid")
    );

    // Overpayment is an observable fact, never negative debt.
    let _ = h.record(1, 1000.0, "completed");
    let dues = h.dues();
    assert_eq!(dues[0].get("totalPaid").and_then(|v| v.as_f64()), Some(28025.0));
    assert_eq!(dues[0].get("outstanding").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(
        dues[0].get("paymentStatus").and_then(|v| v.as_str()),
        Some("fully_paid")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn summary_totals_exclude_hostel_fee_and_count_statuses() {
    let workspace = temp_dir("feeledger-payments-summary");
    let mut h = setup(&workspace);

    let _ = h.record(1, 27025.0, "completed");
    let _ = h.record(2, 2000.0, "completed");
    let _ = h.record(2, 500.0, "pending");
    let _ = h.record(2, 300.0, "failed");
    let _ = h.record(2, 200.0, "refunded");

    let student_id = h.student_id.clone();
    let result = h.call("ledger.summary", json!({ "studentId": student_id }));
    let summary = result.get("summary").expect("summary");
    // 27025 + 22025 due; the 30000 hostel fee is reported separately.
    assert_eq!(
        summary.get("totalAmountDue").and_then(|v| v.as_f64()),
        Some(49050.0)
    );
    assert_eq!(
        summary.get("totalAmountPaid").and_then(|v| v.as_f64()),
        Some(29025.0)
    );
    assert_eq!(
        summary.get("totalOutstanding").and_then(|v| v.as_f64()),
        Some(20025.0)
    );
    assert_eq!(summary.get("hostelFee").and_then(|v| v.as_f64()), Some(30000.0));
    assert_eq!(
        summary.get("completedPayments").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        summary.get("pendingPayments").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        summary.get("failedPayments").and_then(|v| v.as_i64()),
        Some(1)
    );
    // The refund is counted but never subtracted from the paid total.
    assert_eq!(
        summary.get("refundedPayments").and_then(|v| v.as_i64()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn payment_against_unknown_semester_warns_and_never_books() {
    let workspace = temp_dir("feeledger-payments-unknown");
    let mut h = setup(&workspace);

    let student_id = h.student_id.clone();
    let result = h.call(
        "payments.record",
        json!({
            "studentId": student_id,
            "semester": 7,
            "amountPaid": 1000,
            "paymentMethod": "cash"
        }),
    );
    assert!(result
        .get("warning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .contains("semester 7"));

    let dues = h.dues();
    assert_eq!(dues[0].get("totalPaid").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(dues[1].get("totalPaid").and_then(|v| v.as_f64()), Some(0.0));

    let _ = std::fs::remove_dir_all(workspace);
}
