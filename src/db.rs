use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("shuled.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Sequence bumps and aggregate upserts are short write transactions; wait
    // out a concurrent writer instead of surfacing SQLITE_BUSY.
    conn.busy_timeout(Duration::from_secs(5))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sequences(
            kind TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            phone TEXT NOT NULL UNIQUE,
            address TEXT NOT NULL,
            teacher_code TEXT NOT NULL UNIQUE,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            phone TEXT NOT NULL UNIQUE,
            address TEXT NOT NULL,
            parent_code TEXT NOT NULL UNIQUE,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            student_code TEXT NOT NULL UNIQUE,
            parent_code TEXT NOT NULL,
            parent_email TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            name TEXT PRIMARY KEY
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            name TEXT PRIMARY KEY
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS streams(
            id TEXT PRIMARY KEY,
            class_name TEXT NOT NULL,
            letter TEXT NOT NULL,
            display_name TEXT NOT NULL UNIQUE,
            FOREIGN KEY(class_name) REFERENCES classes(name),
            UNIQUE(class_name, letter)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL UNIQUE,
            class_name TEXT NOT NULL,
            stream_letter TEXT NOT NULL,
            subject_count INTEGER NOT NULL,
            teacher_code TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_code) REFERENCES students(student_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_name)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollment_subjects(
            enrollment_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            PRIMARY KEY(enrollment_id, subject),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cats(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            subject TEXT NOT NULL,
            class_name TEXT NOT NULL,
            stream_letter TEXT NOT NULL,
            term INTEGER NOT NULL,
            teacher_code TEXT NOT NULL,
            title TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            subject TEXT NOT NULL,
            class_name TEXT NOT NULL,
            stream_letter TEXT NOT NULL,
            term INTEGER NOT NULL,
            teacher_code TEXT NOT NULL,
            title TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL
        )",
        [],
    )?;

    // One grading row per (assessment, student); duplicate entry attempts
    // surface as constraint violations instead of silently coexisting.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cat_grading(
            id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            student_code TEXT NOT NULL,
            subject TEXT NOT NULL,
            term INTEGER NOT NULL,
            teacher_code TEXT NOT NULL,
            marks INTEGER NOT NULL,
            grade TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(assessment_id) REFERENCES cats(id),
            UNIQUE(assessment_id, student_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cat_grading_lookup
         ON cat_grading(student_code, subject, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_grading(
            id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            student_code TEXT NOT NULL,
            subject TEXT NOT NULL,
            term INTEGER NOT NULL,
            teacher_code TEXT NOT NULL,
            marks INTEGER NOT NULL,
            grade TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(assessment_id) REFERENCES exams(id),
            UNIQUE(assessment_id, student_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_grading_lookup
         ON exam_grading(student_code, subject, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_aggregates(
            id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL,
            subject TEXT NOT NULL,
            term INTEGER NOT NULL,
            cat_marks INTEGER NOT NULL,
            exam_marks INTEGER NOT NULL,
            total INTEGER NOT NULL,
            grade TEXT NOT NULL,
            teacher_code TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(student_code, subject, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_aggregates_student_term
         ON subject_aggregates(student_code, term)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_forms(
            id TEXT PRIMARY KEY,
            student_code TEXT NOT NULL,
            term INTEGER NOT NULL,
            term_name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            stream_letter TEXT NOT NULL,
            total_marks INTEGER NOT NULL,
            total_subjects INTEGER NOT NULL,
            average REAL NOT NULL,
            remark TEXT NOT NULL,
            teacher_code TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(student_code, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_subjects(
            report_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            cat_marks INTEGER NOT NULL,
            exam_marks INTEGER NOT NULL,
            total INTEGER NOT NULL,
            grade TEXT NOT NULL,
            PRIMARY KEY(report_id, subject),
            FOREIGN KEY(report_id) REFERENCES report_forms(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            target_admins INTEGER NOT NULL DEFAULT 0,
            target_teachers INTEGER NOT NULL DEFAULT 0,
            target_parents INTEGER NOT NULL DEFAULT 0,
            target_students INTEGER NOT NULL DEFAULT 0,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}
