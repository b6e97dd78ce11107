use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::grading::Subject;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::catalog::{valid_class_name, valid_stream_letter};
use crate::ipc::helpers::{acting_teacher, db_conn, optional_str, required_str, student_exists};
use crate::ipc::types::{AppState, Request};

pub const CLASS_CAPACITY: i64 = 40;
pub const STREAM_SPLIT: i64 = 20;

fn handle_enrollment_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_code = match acting_teacher(conn, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_name = match required_str(req, "className") {
        Ok(v) => v.to_ascii_uppercase(),
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

    let class_known: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE name = ?", [&class_name], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_known.is_none() {
        return err(
            &req.id,
            "not_found",
            format!("class {} not found", class_name),
            None,
        );
    }

    let already: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE student_code = ?",
            [&student_code],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if already.is_some() {
        return err(
            &req.id,
            "conflict",
            format!("student {} is already enrolled", student_code),
            None,
        );
    }

    // Subjects come in as names; parse against the catalog and de-duplicate.
    let raw_subjects = match req.params.get("subjects").and_then(|v| v.as_array()) {
        Some(arr) => arr.clone(),
        None => return err(&req.id, "bad_params", "subjects must be an array", None),
    };
    let mut subjects: BTreeSet<String> = BTreeSet::new();
    for raw in &raw_subjects {
        let Some(name) = raw.as_str() else {
            return err(&req.id, "bad_params", "subjects must be strings", None);
        };
        match Subject::parse(name) {
            Ok(s) => {
                subjects.insert(s.name().to_string());
            }
            Err(e) => return err(&req.id, e.code(), e.to_string(), None),
        }
    }
    if subjects.is_empty() {
        return err(
            &req.id,
            "validation",
            "a student must take at least one subject",
            None,
        );
    }

    let enrolled_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE class_name = ?",
        [&class_name],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if enrolled_count >= CLASS_CAPACITY {
        return err(
            &req.id,
            "conflict",
            format!(
                "class {} is at capacity ({} students)",
                class_name, CLASS_CAPACITY
            ),
            None,
        );
    }

    // Entry order decides the stream unless one is supplied: the first twenty
    // seats go to E, the rest to W.
    let stream_letter = match optional_str(req, "streamLetter") {
        Some(v) => {
            let letter = v.to_ascii_uppercase();
            if !valid_stream_letter(&letter) {
                return err(
                    &req.id,
                    "validation",
                    format!("stream letter must be E or W, got {}", letter),
                    None,
                );
            }
            letter
        }
        None => {
            if enrolled_count < STREAM_SPLIT {
                "E".to_string()
            } else {
                "W".to_string()
            }
        }
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO enrollments(id, student_code, class_name, stream_letter,
                                 subject_count, teacher_code, created_at)
         VALUES(?, ?, ?, ?, 0, ?, ?)",
        (
            &enrollment_id,
            &student_code,
            &class_name,
            &stream_letter,
            &teacher_code,
            Utc::now().to_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    for subject in &subjects {
        if let Err(e) = tx.execute(
            "INSERT INTO enrollment_subjects(enrollment_id, subject) VALUES(?, ?)",
            (&enrollment_id, subject),
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    // subject_count is always recomputed from the child rows, never trusted.
    if let Err(e) = tx.execute(
        "UPDATE enrollments
         SET subject_count = (SELECT COUNT(*) FROM enrollment_subjects WHERE enrollment_id = ?)
         WHERE id = ?",
        (&enrollment_id, &enrollment_id),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "studentCode": student_code,
            "className": class_name,
            "streamLetter": stream_letter,
            "streamName": format!("{}{}", class_name, stream_letter),
            "subjectCount": subjects.len()
        }),
    )
}

fn handle_enrollment_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row: Option<(String, String, String, i64)> = match conn
        .query_row(
            "SELECT id, class_name, stream_letter, subject_count
             FROM enrollments
             WHERE student_code = ?",
            [&student_code],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((enrollment_id, class_name, stream_letter, subject_count)) = row else {
        return err(
            &req.id,
            "not_found",
            format!("no enrollment for student {}", student_code),
            None,
        );
    };

    let mut stmt = match conn.prepare(
        "SELECT subject FROM enrollment_subjects WHERE enrollment_id = ? ORDER BY subject",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subjects = stmt
        .query_map([&enrollment_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let subjects = match subjects {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "studentCode": student_code,
            "className": class_name,
            "streamLetter": stream_letter,
            "streamName": format!("{}{}", class_name, stream_letter),
            "subjectCount": subject_count,
            "subjects": subjects
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollment.assign" => Some(handle_enrollment_assign(state, req)),
        "enrollment.get" => Some(handle_enrollment_get(state, req)),
        _ => None,
    }
}
