use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::codes::{next_code, CodeKind};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, is_unique_violation, required_str};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaffRole {
    Teacher,
    Parent,
}

impl StaffRole {
    fn role_name(self) -> &'static str {
        match self {
            StaffRole::Teacher => "teacher",
            StaffRole::Parent => "parent",
        }
    }

    fn table(self) -> &'static str {
        match self {
            StaffRole::Teacher => "teachers",
            StaffRole::Parent => "parents",
        }
    }

    fn code_column(self) -> &'static str {
        match self {
            StaffRole::Teacher => "teacher_code",
            StaffRole::Parent => "parent_code",
        }
    }

    fn code_kind(self) -> CodeKind {
        match self {
            StaffRole::Teacher => CodeKind::Teacher,
            StaffRole::Parent => CodeKind::Parent,
        }
    }
}

/// Phone numbers are ten digits starting 01 or 07.
fn valid_phone(phone: &str) -> bool {
    phone.len() == 10
        && phone.bytes().all(|b| b.is_ascii_digit())
        && (phone.starts_with("01") || phone.starts_with("07"))
}

fn handle_create(state: &mut AppState, req: &Request, role: StaffRole) -> serde_json::Value {
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
    let phone = match required_str(req, "phone") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let address = match required_str(req, "address") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if !email.contains('@') {
        return err(&req.id, "validation", "email is not valid", None);
    }
    if !valid_phone(&phone) {
        return err(
            &req.id,
            "validation",
            "phone must be ten digits starting 01 or 07",
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
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            role.role_name(),
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

    let code = match next_code(&tx, role.code_kind()) {
        Ok(c) => c,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    };

    let insert = format!(
        "INSERT INTO {}(id, user_id, phone, address, {}) VALUES(?, ?, ?, ?, ?)",
        role.table(),
        role.code_column()
    );
    if let Err(e) = tx.execute(
        &insert,
        (Uuid::new_v4().to_string(), &user_id, &phone, &address, &code),
    ) {
        let _ = tx.rollback();
        if is_unique_violation(&e) {
            return err(&req.id, "conflict", "phone already in use", None);
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(code = %code, role = role.role_name(), "staff record created");
    ok(
        &req.id,
        json!({
            "code": code,
            "username": username,
            "firstName": first_name,
            "lastName": last_name
        }),
    )
}

fn handle_list(state: &mut AppState, req: &Request, role: StaffRole) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let sql = format!(
        "SELECT t.{}, u.first_name, u.last_name, u.username, u.email, t.phone
         FROM {} t
         JOIN users u ON u.id = t.user_id
         ORDER BY t.{}",
        role.code_column(),
        role.table(),
        role.code_column()
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let code: String = row.get(0)?;
            let first_name: String = row.get(1)?;
            let last_name: String = row.get(2)?;
            let username: String = row.get(3)?;
            let email: String = row.get(4)?;
            let phone: String = row.get(5)?;
            Ok(json!({
                "code": code,
                "firstName": first_name,
                "lastName": last_name,
                "username": username,
                "email": email,
                "phone": phone
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(list) => {
            let mut body = serde_json::Map::new();
            body.insert(role.table().to_string(), serde_json::Value::Array(list));
            ok(&req.id, serde_json::Value::Object(body))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_create(state, req, StaffRole::Teacher)),
        "teachers.list" => Some(handle_list(state, req, StaffRole::Teacher)),
        "parents.create" => Some(handle_create(state, req, StaffRole::Parent)),
        "parents.list" => Some(handle_list(state, req, StaffRole::Parent)),
        _ => None,
    }
}
