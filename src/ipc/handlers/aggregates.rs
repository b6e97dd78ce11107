use crate::aggregate::{aggregate_subject, PipelineContext};
use crate::grading::Subject;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{acting_teacher, db_conn, domain_err, required_i64, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_aggregate_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let subject = match required_str(req, "subject") {
        Ok(v) => match Subject::parse(&v) {
            Ok(s) => s,
            Err(e) => return domain_err(&req.id, &e),
        },
        Err(resp) => return resp,
    };
    let term = match required_i64(req, "term") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let ctx = PipelineContext { conn };
    match aggregate_subject(&ctx, &student_code, subject, term, &teacher_code) {
        Ok(agg) => match serde_json::to_value(&agg) {
            Ok(body) => ok(&req.id, body),
            Err(e) => err(&req.id, "internal", e.to_string(), None),
        },
        Err(e) => domain_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "aggregate.subject" => Some(handle_aggregate_subject(state, req)),
        _ => None,
    }
}
