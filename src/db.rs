use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("feeledger.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            admission_number TEXT,
            department TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_admission_number ON students(admission_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_structures(
            id TEXT PRIMARY KEY,
            structure_type TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            effective_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            grand_total REAL NOT NULL,
            hostel_fee REAL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_structures_year ON fee_structures(academic_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_structures_type_year
         ON fee_structures(structure_type, academic_year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_fees(
            structure_id TEXT NOT NULL,
            semester INTEGER NOT NULL,
            semester_name TEXT NOT NULL,
            admission_fee REAL NOT NULL,
            exam_permit_reg_fee REAL NOT NULL,
            special_fee REAL NOT NULL,
            tuition_fee REAL NOT NULL,
            fee_fund_charges REAL,
            others REAL NOT NULL,
            total REAL NOT NULL,
            PRIMARY KEY(structure_id, semester),
            FOREIGN KEY(structure_id) REFERENCES fee_structures(id)
        )",
        [],
    )?;

    // Assignments keep a frozen JSON snapshot of the structure at assignment
    // time. Re-assignment marks the old row superseded instead of deleting it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_assignments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            structure_id TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            notes TEXT,
            superseded INTEGER NOT NULL DEFAULT 0,
            assigned_by TEXT NOT NULL,
            assigned_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(structure_id) REFERENCES fee_structures(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_assignments_student ON fee_assignments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS customizations(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            semester INTEGER NOT NULL,
            fees TEXT NOT NULL,
            reason TEXT NOT NULL,
            customized_by TEXT NOT NULL,
            customized_at TEXT NOT NULL,
            UNIQUE(assignment_id, seq),
            FOREIGN KEY(assignment_id) REFERENCES fee_assignments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_customizations_assignment
         ON customizations(assignment_id, seq)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            semester INTEGER,
            amount_paid REAL NOT NULL,
            payment_status TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            payment_date TEXT NOT NULL,
            academic_year TEXT,
            receipt_number TEXT,
            transaction_id TEXT,
            notes TEXT,
            recorded_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student_semester
         ON payments(student_id, semester)",
        [],
    )?;

    // Status corrections are additive: the payment row carries the current
    // status, the log keeps every transition with its reason.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payment_status_log(
            id TEXT PRIMARY KEY,
            payment_id TEXT NOT NULL,
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            reason TEXT NOT NULL,
            changed_by TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            FOREIGN KEY(payment_id) REFERENCES payments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payment_status_log_payment
         ON payment_status_log(payment_id)",
        [],
    )?;

    // Admission applications precede the student record; approval assigns
    // the admission number. Status changes are locked after approval and
    // every transition is logged.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS applications(
            id TEXT PRIMARY KEY,
            applicant_name TEXT NOT NULL,
            email TEXT NOT NULL,
            course TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            admission_number TEXT,
            notes TEXT,
            submitted_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS application_status_log(
            id TEXT PRIMARY KEY,
            application_id TEXT NOT NULL,
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            reason TEXT NOT NULL,
            changed_by TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            FOREIGN KEY(application_id) REFERENCES applications(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_application_status_log_application
         ON application_status_log(application_id)",
        [],
    )?;

    ensure_payments_academic_year(&conn)?;
    ensure_students_updated_at(&conn)?;

    Ok(conn)
}

fn ensure_payments_academic_year(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces recorded payments without an academic year.
    if table_has_column(conn, "payments", "academic_year")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE payments ADD COLUMN academic_year TEXT", [])?;
    Ok(())
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
