use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::grading::Subject;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, is_unique_violation, required_str};
use crate::ipc::types::{AppState, Request};

pub const CLASS_NAMES: [&str; 4] = ["F1", "F2", "F3", "F4"];
pub const STREAM_LETTERS: [&str; 2] = ["E", "W"];

pub fn valid_class_name(name: &str) -> bool {
    CLASS_NAMES.contains(&name)
}

pub fn valid_stream_letter(letter: &str) -> bool {
    STREAM_LETTERS.contains(&letter)
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let subject = match Subject::parse(&name) {
        Ok(s) => s,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };

    if let Err(e) = conn.execute("INSERT INTO subjects(name) VALUES(?)", [subject.name()]) {
        if is_unique_violation(&e) {
            return err(
                &req.id,
                "conflict",
                format!("subject {} already exists", subject),
                None,
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "name": subject.name() }))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare("SELECT name FROM subjects ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(resp) => return resp,
    };

    if !valid_class_name(&name) {
        return err(
            &req.id,
            "validation",
            format!("class must be one of F1..F4, got {}", name),
            None,
        );
    }

    if let Err(e) = conn.execute("INSERT INTO classes(name) VALUES(?)", [&name]) {
        if is_unique_violation(&e) {
            return err(
                &req.id,
                "conflict",
                format!("class {} already exists", name),
                None,
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "name": name }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare("SELECT name FROM classes ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_streams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_name = match required_str(req, "className") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(resp) => return resp,
    };
    let letter = match required_str(req, "letter") {
        Ok(v) => v.to_ascii_uppercase(),
        Err(resp) => return resp,
    };

    if !valid_stream_letter(&letter) {
        return err(
            &req.id,
            "validation",
            format!("stream letter must be E or W, got {}", letter),
            None,
        );
    }

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE name = ?", [&class_name], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(
            &req.id,
            "not_found",
            format!("class {} not found", class_name),
            None,
        );
    }

    // The display name is derived, never supplied: F1 + E -> F1E.
    let display_name = format!("{}{}", class_name, letter);
    if let Err(e) = conn.execute(
        "INSERT INTO streams(id, class_name, letter, display_name) VALUES(?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &class_name,
            &letter,
            &display_name,
        ),
    ) {
        if is_unique_violation(&e) {
            return err(
                &req.id,
                "conflict",
                format!("stream {} already exists", display_name),
                None,
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "className": class_name,
            "letter": letter,
            "displayName": display_name
        }),
    )
}

fn handle_streams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare(
        "SELECT class_name, letter, display_name FROM streams ORDER BY display_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let class_name: String = row.get(0)?;
            let letter: String = row.get(1)?;
            let display_name: String = row.get(2)?;
            Ok(json!({
                "className": class_name,
                "letter": letter,
                "displayName": display_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(streams) => ok(&req.id, json!({ "streams": streams })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "streams.create" => Some(handle_streams_create(state, req)),
        "streams.list" => Some(handle_streams_list(state, req)),
        _ => None,
    }
}
