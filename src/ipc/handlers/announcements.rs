use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{bool_param, db_conn, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_announcements_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match required_str(req, "body") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let created_by = match required_str(req, "createdBy") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let author_known: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?",
            [&created_by],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if author_known.is_none() {
        return err(
            &req.id,
            "not_found",
            format!("user {} not found", created_by),
            None,
        );
    }

    let target_admins = bool_param(req, "targetAdmins");
    let target_teachers = bool_param(req, "targetTeachers");
    let target_parents = bool_param(req, "targetParents");
    let target_students = bool_param(req, "targetStudents");
    if !(target_admins || target_teachers || target_parents || target_students) {
        return err(
            &req.id,
            "validation",
            "an announcement must target at least one audience",
            None,
        );
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO announcements(id, title, body, target_admins, target_teachers,
                                   target_parents, target_students, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &title,
            &body,
            target_admins as i64,
            target_teachers as i64,
            target_parents as i64,
            target_students as i64,
            &created_by,
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "id": id,
            "title": title,
            "targetAdmins": target_admins,
            "targetTeachers": target_teachers,
            "targetParents": target_parents,
            "targetStudents": target_students
        }),
    )
}

fn handle_announcements_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, body, target_admins, target_teachers,
                target_parents, target_students, created_by, created_at
         FROM announcements
         ORDER BY created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "body": row.get::<_, String>(2)?,
                "targetAdmins": row.get::<_, i64>(3)? != 0,
                "targetTeachers": row.get::<_, i64>(4)? != 0,
                "targetParents": row.get::<_, i64>(5)? != 0,
                "targetStudents": row.get::<_, i64>(6)? != 0,
                "createdBy": row.get::<_, String>(7)?,
                "createdAt": row.get::<_, String>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(list) => ok(&req.id, json!({ "announcements": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.create" => Some(handle_announcements_create(state, req)),
        "announcements.list" => Some(handle_announcements_list(state, req)),
        _ => None,
    }
}
