use crate::aggregate::{compile_report, fetch_report, PipelineContext};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{acting_teacher, db_conn, domain_err, optional_i64, required_i64, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_reports_compile(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let term = match optional_i64(req, "term") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let ctx = PipelineContext { conn };
    match compile_report(&ctx, &student_code, term, &teacher_code) {
        Ok(report) => {
            tracing::info!(
                student = %student_code,
                term = report.term,
                average = report.average,
                "report form compiled"
            );
            match serde_json::to_value(&report) {
                Ok(body) => ok(&req.id, body),
                Err(e) => err(&req.id, "internal", e.to_string(), None),
            }
        }
        Err(e) => domain_err(&req.id, &e),
    }
}

fn handle_reports_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_code = match required_str(req, "studentCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term = match required_i64(req, "term") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let ctx = PipelineContext { conn };
    match fetch_report(&ctx, &student_code, term) {
        Ok(report) => match serde_json::to_value(&report) {
            Ok(body) => ok(&req.id, body),
            Err(e) => err(&req.id, "internal", e.to_string(), None),
        },
        Err(e) => domain_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.compile" => Some(handle_reports_compile(state, req)),
        "reports.get" => Some(handle_reports_get(state, req)),
        _ => None,
    }
}
