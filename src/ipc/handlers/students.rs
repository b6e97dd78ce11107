use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::codes::{next_code, CodeKind};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, is_unique_violation, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let parent_code = match required_str(req, "parentCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let parent_email = match required_str(req, "parentEmail") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !email.contains('@') {
        return err(&req.id, "validation", "email is not valid", None);
    }

    // Guardian linkage is cross-checked against the parent record before any
    // student row is written.
    let parent_row: Option<String> = match conn
        .query_row(
            "SELECT u.email
             FROM parents p
             JOIN users u ON u.id = p.user_id
             WHERE p.parent_code = ?",
            [&parent_code],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(registered_email) = parent_row else {
        return err(
            &req.id,
            "not_found",
            format!("parent {} not found", parent_code),
            None,
        );
    };
    if !registered_email.eq_ignore_ascii_case(&parent_email) {
        return err(
            &req.id,
            "validation",
            format!("parent email does not match the record for {}", parent_code),
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO users(id, role, first_name, last_name, username, email, created_at)
         VALUES(?, 'student', ?, ?, ?, ?, ?)",
        (
            &user_id,
            &first_name,
            &last_name,
            &username,
            &email,
            Utc::now().to_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        if is_unique_violation(&e) {
            return err(&req.id, "conflict", "username or email already in use", None);
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    let student_code = match next_code(&tx, CodeKind::Student) {
        Ok(c) => c,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    };

    if let Err(e) = tx.execute(
        "INSERT INTO students(id, user_id, student_code, parent_code, parent_email)
         VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &user_id,
            &student_code,
            &parent_code,
            &parent_email,
        ),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(code = %student_code, "student registered");
    ok(
        &req.id,
        json!({
            "studentCode": student_code,
            "firstName": first_name,
            "lastName": last_name,
            "parentCode": parent_code
        }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT s.student_code, u.first_name, u.last_name, u.username, s.parent_code
         FROM students s
         JOIN users u ON u.id = s.user_id
         ORDER BY s.student_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let student_code: String = row.get(0)?;
            let first_name: String = row.get(1)?;
            let last_name: String = row.get(2)?;
            let username: String = row.get(3)?;
            let parent_code: String = row.get(4)?;
            Ok(json!({
                "studentCode": student_code,
                "firstName": first_name,
                "lastName": last_name,
                "username": username,
                "parentCode": parent_code
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
