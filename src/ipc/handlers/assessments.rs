use chrono::DateTime;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::codes::{next_code, CodeKind};
use crate::grading::{validate_term, Subject};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::catalog::valid_class_name;
use crate::ipc::helpers::{acting_teacher, db_conn, required_i64, required_str};
use crate::ipc::types::{AppState, Request};

pub const CAT_MINUTES: i64 = 40;
pub const EXAM_MIN_MINUTES: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssessmentKind {
    Cat,
    Exam,
}

impl AssessmentKind {
    fn label(self) -> &'static str {
        match self {
            AssessmentKind::Cat => "CAT",
            AssessmentKind::Exam => "exam",
        }
    }

    fn table(self) -> &'static str {
        match self {
            AssessmentKind::Cat => "cats",
            AssessmentKind::Exam => "exams",
        }
    }

    fn code_kind(self) -> CodeKind {
        match self {
            AssessmentKind::Cat => CodeKind::Cat,
            AssessmentKind::Exam => CodeKind::Exam,
        }
    }

    fn check_duration(self, minutes: i64) -> Result<(), String> {
        match self {
            AssessmentKind::Cat if minutes != CAT_MINUTES => Err(format!(
                "a CAT runs for exactly {} minutes, got {}",
                CAT_MINUTES, minutes
            )),
            AssessmentKind::Exam if minutes < EXAM_MIN_MINUTES => Err(format!(
                "an exam runs for at least {} minutes, got {}",
                EXAM_MIN_MINUTES, minutes
            )),
            _ => Ok(()),
        }
    }
}

fn handle_create(state: &mut AppState, req: &Request, kind: AssessmentKind) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_code = match acting_teacher(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => match Subject::parse(&v) {
            Ok(s) => s,
            Err(e) => return err(&req.id, e.code(), e.to_string(), None),
        },
        Err(resp) => return resp,
    };
    let class_name = match required_str(req, "className") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(resp) => return resp,
    };
    let stream_letter = match required_str(req, "streamLetter") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_i64(req, "term") {
        Ok(v) => match validate_term(v) {
            Ok(t) => t,
            Err(e) => return err(&req.id, e.code(), e.to_string(), None),
        },
        Err(resp) => return resp,
    };

    if !valid_class_name(&class_name) {
        return err(
            &req.id,
            "validation",
            format!("class must be one of F1..F4, got {}", class_name),
            None,
        );
    }

    let stream_known: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM streams WHERE class_name = ? AND letter = ?",
            (&class_name, &stream_letter),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if stream_known.is_none() {
        return err(
            &req.id,
            "not_found",
            format!("stream {}{} not found", class_name, stream_letter),
            None,
        );
    }

    let starts_at_raw = match required_str(req, "startsAt") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ends_at_raw = match required_str(req, "endsAt") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let starts_at = match DateTime::parse_from_rfc3339(&starts_at_raw) {
        Ok(t) => t,
        Err(e) => {
            return err(
                &req.id,
                "validation",
                format!("startsAt is not RFC 3339: {}", e),
                None,
            )
        }
    };
    let ends_at = match DateTime::parse_from_rfc3339(&ends_at_raw) {
        Ok(t) => t,
        Err(e) => {
            return err(
                &req.id,
                "validation",
                format!("endsAt is not RFC 3339: {}", e),
                None,
            )
        }
    };
    if ends_at <= starts_at {
        return err(&req.id, "validation", "endsAt must be after startsAt", None);
    }
    let minutes = (ends_at - starts_at).num_minutes();
    if let Err(msg) = kind.check_duration(minutes) {
        return err(&req.id, "validation", msg, None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let code = match next_code(&tx, kind.code_kind()) {
        Ok(c) => c,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    };
    let insert = format!(
        "INSERT INTO {}(id, code, subject, class_name, stream_letter, term,
                        teacher_code, title, starts_at, ends_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        kind.table()
    );
    if let Err(e) = tx.execute(
        &insert,
        (
            Uuid::new_v4().to_string(),
            &code,
            subject.name(),
            &class_name,
            &stream_letter,
            term,
            &teacher_code,
            &title,
            starts_at.to_rfc3339(),
            ends_at.to_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(code = %code, kind = kind.label(), subject = %subject, "assessment scheduled");
    ok(
        &req.id,
        json!({
            "code": code,
            "subject": subject.name(),
            "className": class_name,
            "streamLetter": stream_letter,
            "term": term,
            "durationMinutes": minutes
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cats.create" => Some(handle_create(state, req, AssessmentKind::Cat)),
        "exams.create" => Some(handle_create(state, req, AssessmentKind::Exam)),
        _ => None,
    }
}
