use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::grading::{GradeCurve, Subject};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    acting_teacher, db_conn, is_unique_violation, required_i64, required_str, student_exists,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

    fn assessment_lookup_sql(self) -> &'static str {
        match self {
            GradingKind::Cat => "SELECT id, subject, term FROM cats WHERE code = ?",
            GradingKind::Exam => "SELECT id, subject, term FROM exams WHERE code = ?",
        }
    }

    fn insert_sql(self) -> &'static str {
        match self {
            GradingKind::Cat => {
                "INSERT INTO cat_grading(id, assessment_id, student_code, subject, term,
                                         teacher_code, marks, grade, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)"
            }
            GradingKind::Exam => {
                "INSERT INTO exam_grading(id, assessment_id, student_code, subject, term,
                                          teacher_code, marks, grade, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)"
            }
        }
    }

    fn curve(self) -> GradeCurve {
        match self {
            GradingKind::Cat => GradeCurve::cat(),
            GradingKind::Exam => GradeCurve::exam(),
        }
    }
}

fn handle_grade(state: &mut AppState, req: &Request, kind: GradingKind) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_code = match acting_teacher(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let assessment_code = match required_str(req, "assessmentCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => match Subject::parse(&v) {
            Ok(s) => s,
            Err(e) => return err(&req.id, e.code(), e.to_string(), None),
        },
        Err(resp) => return resp,
    };
    let marks = match required_i64(req, "marks") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let assessment: Option<(String, String, i64)> = match conn
        .query_row(kind.assessment_lookup_sql(), [&assessment_code], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((assessment_id, assessment_subject, term)) = assessment else {
        return err(
            &req.id,
            "not_found",
            format!("{} {} not found", kind.label(), assessment_code),
            None,
        );
    };
    if assessment_subject != subject.name() {
        return err(
            &req.id,
            "validation",
            format!(
                "{} {} covers {}, not {}",
                kind.label(),
                assessment_code,
                assessment_subject,
                subject
            ),
            None,
        );
    }

    match student_exists(conn, req, &student_code) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                format!("student {} not found", student_code),
                None,
            )
        }
        Err(resp) => return resp,
    }

    // Marks only count for a subject the student is actually enrolled in.
    let enrollment_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM enrollments WHERE student_code = ?",
            [&student_code],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(enrollment_id) = enrollment_id else {
        return err(
            &req.id,
            "state_inconsistency",
            format!("student {} has no enrollment record", student_code),
            None,
        );
    };
    let takes_subject: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM enrollment_subjects WHERE enrollment_id = ? AND subject = ?",
            (&enrollment_id, subject.name()),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if takes_subject.is_none() {
        return err(
            &req.id,
            "validation",
            format!("student {} does not take {}", student_code, subject),
            None,
        );
    }

    // The grade is a pure function of the marks, fixed at write time.
    let grade = match kind.curve().letter(marks) {
        Ok(g) => g,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };

    if let Err(e) = conn.execute(
        kind.insert_sql(),
        (
            Uuid::new_v4().to_string(),
            &assessment_id,
            &student_code,
            subject.name(),
            term,
            &teacher_code,
            marks,
            grade,
            Utc::now().to_rfc3339(),
        ),
    ) {
        if is_unique_violation(&e) {
            return err(
                &req.id,
                "conflict",
                format!(
                    "student {} already has a grading for {} {}",
                    student_code,
                    kind.label(),
                    assessment_code
                ),
                None,
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "assessmentCode": assessment_code,
            "studentCode": student_code,
            "subject": subject.name(),
            "term": term,
            "marks": marks,
            "grade": grade
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.cat" => Some(handle_grade(state, req, GradingKind::Cat)),
        "grading.exam" => Some(handle_grade(state, req, GradingKind::Exam)),
        _ => None,
    }
}
