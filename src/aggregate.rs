use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::grading::{
    remark_for_average, term_name, validate_term, DomainError, GradeCurve, Subject, MAX_TERMS,
};

#[derive(Debug, Clone, Copy)]
pub struct PipelineContext<'a> {
    pub conn: &'a Connection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAggregate {
    pub student_code: String,
    pub subject: Subject,
    pub term: i64,
    pub cat_marks: i64,
    pub exam_marks: i64,
    pub total: i64,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSubjectLine {
    pub subject: Subject,
    pub cat_marks: i64,
    pub exam_marks: i64,
    pub total: i64,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportModel {
    pub student_code: String,
    pub first_name: String,
    pub last_name: String,
    pub class_name: String,
    pub stream_letter: String,
    pub term: i64,
    pub term_name: String,
    pub total_marks: i64,
    pub total_subjects: i64,
    pub average: f64,
    pub remark: String,
    pub teacher_code: String,
    pub subjects: Vec<ReportSubjectLine>,
}

#[derive(Debug, Clone, Copy)]
enum GradingKind {
    Cat,
    Exam,
}

impl GradingKind {
    fn label(self) -> &'static str {
        match self {
            GradingKind::Cat => "CAT",
            GradingKind::Exam => "exam",
        }
    }

    fn lookup_sql(self) -> &'static str {
        match self {
            GradingKind::Cat => {
                "SELECT marks FROM cat_grading
                 WHERE student_code = ? AND subject = ? AND term = ?"
            }
            GradingKind::Exam => {
                "SELECT marks FROM exam_grading
                 WHERE student_code = ? AND subject = ? AND term = ?"
            }
        }
    }
}

fn student_exists(conn: &Connection, student_code: &str) -> Result<bool, DomainError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_code = ?",
            [student_code],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Exactly one grading record must match (student, subject, term). Zero is an
/// ungraded dependency; more than one is ambiguous and must be resolved
/// upstream, never picked from arbitrarily.
fn single_grading_marks(
    conn: &Connection,
    kind: GradingKind,
    student_code: &str,
    subject: Subject,
    term: i64,
) -> Result<i64, DomainError> {
    let mut stmt = conn.prepare(kind.lookup_sql())?;
    let marks: Vec<i64> = stmt
        .query_map((student_code, subject.name(), term), |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    match marks.as_slice() {
        [] => Err(DomainError::StateInconsistency(format!(
            "no {} grading recorded for {} in {} {}",
            kind.label(),
            student_code,
            subject,
            term_name(term)
        ))),
        [one] => Ok(*one),
        many => Err(DomainError::conflict(format!(
            "ambiguous {} grading: {} records for {} in {} {}",
            kind.label(),
            many.len(),
            student_code,
            subject,
            term_name(term)
        ))),
    }
}

/// Combine the single CAT and exam grading for (student, subject, term) into
/// one total and grade, upserting the aggregate row. Latest run replaces any
/// prior aggregate for the same key.
pub fn aggregate_subject(
    ctx: &PipelineContext<'_>,
    student_code: &str,
    subject: Subject,
    term: i64,
    teacher_code: &str,
) -> Result<SubjectAggregate, DomainError> {
    let conn = ctx.conn;
    let term = validate_term(term)?;

    if !student_exists(conn, student_code)? {
        return Err(DomainError::not_found(format!(
            "student {} not found",
            student_code
        )));
    }

    let cat_marks = single_grading_marks(conn, GradingKind::Cat, student_code, subject, term)?;
    let exam_marks = single_grading_marks(conn, GradingKind::Exam, student_code, subject, term)?;

    let total = cat_marks + exam_marks;
    let grade = GradeCurve::overall().letter(total)?;

    conn.execute(
        "INSERT INTO subject_aggregates(
            id, student_code, subject, term, cat_marks, exam_marks,
            total, grade, teacher_code, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_code, subject, term) DO UPDATE SET
            cat_marks = excluded.cat_marks,
            exam_marks = excluded.exam_marks,
            total = excluded.total,
            grade = excluded.grade,
            teacher_code = excluded.teacher_code,
            updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            student_code,
            subject.name(),
            term,
            cat_marks,
            exam_marks,
            total,
            grade,
            teacher_code,
            Utc::now().to_rfc3339(),
        ),
    )?;

    Ok(SubjectAggregate {
        student_code: student_code.to_string(),
        subject,
        term,
        cat_marks,
        exam_marks,
        total,
        grade: grade.to_string(),
    })
}

fn catalog_position(subject: Subject) -> usize {
    Subject::ALL.iter().position(|s| *s == subject).unwrap_or(0)
}

/// Compile (or recompile) a student's report form for a term.
///
/// With no explicit term the next sequential term is created; `term1` for the
/// first report, failing with a conflict once all three terms exist. An
/// explicit term updates its report in place when it already exists, and is
/// otherwise only accepted when it is exactly the next term in order.
pub fn compile_report(
    ctx: &PipelineContext<'_>,
    student_code: &str,
    requested_term: Option<i64>,
    teacher_code: &str,
) -> Result<ReportModel, DomainError> {
    let conn = ctx.conn;

    let student: Option<(String, String)> = conn
        .query_row(
            "SELECT u.first_name, u.last_name
             FROM students s
             JOIN users u ON u.id = s.user_id
             WHERE s.student_code = ?",
            [student_code],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((first_name, last_name)) = student else {
        return Err(DomainError::not_found(format!(
            "student {} not found",
            student_code
        )));
    };

    let enrollment: Option<(String, String)> = conn
        .query_row(
            "SELECT class_name, stream_letter FROM enrollments WHERE student_code = ?",
            [student_code],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((class_name, stream_letter)) = enrollment else {
        return Err(DomainError::StateInconsistency(format!(
            "student {} has no enrollment record",
            student_code
        )));
    };

    let mut stmt =
        conn.prepare("SELECT term FROM report_forms WHERE student_code = ? ORDER BY term")?;
    let existing_terms: Vec<i64> = stmt
        .query_map([student_code], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let next_term = existing_terms.last().copied().unwrap_or(0) + 1;

    // The term cap is checked before input validation: once three reports
    // exist, anything that is not a recompile of one of them is a conflict.
    let at_cap = existing_terms.len() as i64 >= MAX_TERMS;
    let term = match requested_term {
        Some(t) => {
            if at_cap && !existing_terms.contains(&t) {
                return Err(DomainError::conflict(format!(
                    "maximum terms reached: {} already has {} report forms",
                    student_code, MAX_TERMS
                )));
            }
            let t = validate_term(t)?;
            if existing_terms.contains(&t) || t == next_term {
                t
            } else {
                return Err(DomainError::validation(format!(
                    "report terms are assigned in order; next term for {} is {}",
                    student_code,
                    term_name(next_term)
                )));
            }
        }
        None => {
            if at_cap {
                return Err(DomainError::conflict(format!(
                    "maximum terms reached: {} already has {} report forms",
                    student_code, MAX_TERMS
                )));
            }
            next_term
        }
    };

    let mut stmt = conn.prepare(
        "SELECT subject, cat_marks, exam_marks, total, grade
         FROM subject_aggregates
         WHERE student_code = ? AND term = ?",
    )?;
    let rows: Vec<(String, i64, i64, i64, String)> = stmt
        .query_map((student_code, term), |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Err(DomainError::StateInconsistency(format!(
            "no subject aggregates recorded for {} in {}",
            student_code,
            term_name(term)
        )));
    }

    let mut subjects: Vec<ReportSubjectLine> = Vec::with_capacity(rows.len());
    for (subject, cat_marks, exam_marks, total, grade) in rows {
        subjects.push(ReportSubjectLine {
            subject: Subject::parse(&subject)?,
            cat_marks,
            exam_marks,
            total,
            grade,
        });
    }
    subjects.sort_by_key(|line| catalog_position(line.subject));

    let total_marks: i64 = subjects.iter().map(|s| s.total).sum();
    let total_subjects = subjects.iter().filter(|s| s.total > 0).count() as i64;
    let average = if total_subjects > 0 {
        total_marks as f64 / total_subjects as f64
    } else {
        0.0
    };
    let remark = remark_for_average(average).to_string();

    let now = Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    let existing_id: Option<String> = tx
        .query_row(
            "SELECT id FROM report_forms WHERE student_code = ? AND term = ?",
            (student_code, term),
            |r| r.get(0),
        )
        .optional()?;
    let report_id = match existing_id {
        Some(id) => {
            tx.execute(
                "UPDATE report_forms SET
                    class_name = ?, stream_letter = ?, total_marks = ?,
                    total_subjects = ?, average = ?, remark = ?,
                    teacher_code = ?, updated_at = ?
                 WHERE id = ?",
                (
                    &class_name,
                    &stream_letter,
                    total_marks,
                    total_subjects,
                    average,
                    &remark,
                    teacher_code,
                    &now,
                    &id,
                ),
            )?;
            tx.execute("DELETE FROM report_subjects WHERE report_id = ?", [&id])?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO report_forms(
                    id, student_code, term, term_name, class_name, stream_letter,
                    total_marks, total_subjects, average, remark, teacher_code,
                    created_at, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    student_code,
                    term,
                    term_name(term),
                    &class_name,
                    &stream_letter,
                    total_marks,
                    total_subjects,
                    average,
                    &remark,
                    teacher_code,
                    &now,
                    &now,
                ),
            )?;
            id
        }
    };
    for line in &subjects {
        tx.execute(
            "INSERT INTO report_subjects(report_id, subject, cat_marks, exam_marks, total, grade)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &report_id,
                line.subject.name(),
                line.cat_marks,
                line.exam_marks,
                line.total,
                &line.grade,
            ),
        )?;
    }
    tx.commit()?;

    Ok(ReportModel {
        student_code: student_code.to_string(),
        first_name,
        last_name,
        class_name,
        stream_letter,
        term,
        term_name: term_name(term),
        total_marks,
        total_subjects,
        average,
        remark,
        teacher_code: teacher_code.to_string(),
        subjects,
    })
}

/// Read back a compiled report form with its subject lines.
pub fn fetch_report(
    ctx: &PipelineContext<'_>,
    student_code: &str,
    term: i64,
) -> Result<ReportModel, DomainError> {
    let conn = ctx.conn;
    let term = validate_term(term)?;

    let header: Option<(String, String, String, i64, i64, f64, String, String)> = conn
        .query_row(
            "SELECT id, class_name, stream_letter, total_marks, total_subjects,
                    average, remark, teacher_code
             FROM report_forms
             WHERE student_code = ? AND term = ?",
            (student_code, term),
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
                ))
            },
        )
        .optional()?;
    let Some((
        report_id,
        class_name,
        stream_letter,
        total_marks,
        total_subjects,
        average,
        remark,
        teacher_code,
    )) = header
    else {
        return Err(DomainError::not_found(format!(
            "no report form for {} in {}",
            student_code,
            term_name(term)
        )));
    };

    let (first_name, last_name): (String, String) = conn.query_row(
        "SELECT u.first_name, u.last_name
         FROM students s
         JOIN users u ON u.id = s.user_id
         WHERE s.student_code = ?",
        [student_code],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT subject, cat_marks, exam_marks, total, grade
         FROM report_subjects
         WHERE report_id = ?",
    )?;
    let rows: Vec<(String, i64, i64, i64, String)> = stmt
        .query_map([&report_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut subjects: Vec<ReportSubjectLine> = Vec::with_capacity(rows.len());
    for (subject, cat_marks, exam_marks, total, grade) in rows {
        subjects.push(ReportSubjectLine {
            subject: Subject::parse(&subject)?,
            cat_marks,
            exam_marks,
            total,
            grade,
        });
    }
    subjects.sort_by_key(|line| catalog_position(line.subject));

    Ok(ReportModel {
        student_code: student_code.to_string(),
        first_name,
        last_name,
        class_name,
        stream_letter,
        term,
        term_name: term_name(term),
        total_marks,
        total_subjects,
        average,
        remark,
        teacher_code,
        subjects,
    })
}
