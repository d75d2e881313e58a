//! Request dispatch and middleware chain (spec.md §4.8).
//!
//! Route registration collects triples into an insertion-ordered sequence;
//! middleware is a parallel sequence with the same shape. At dispatch
//! time: guard the DB against a stale transaction, walk the middleware
//! chain in registration order short-circuiting on a non-zero return, then
//! fall through to the first matching route.

use crate::request::{make_response_handle, request_to_lua, RawRequest, RawResponse};
use crate::route::{method_matches, pattern_matches, Entry};
use hull_capability::Database;
use hull_core::HullError;
use mlua::Lua;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{error, warn};

#[derive(Default)]
pub struct Dispatcher {
    routes: Vec<Entry>,
    middleware: Vec<Entry>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher::default()
    }

    pub fn register_route(&mut self, method: String, pattern: String, handler: mlua::RegistryKey) {
        self.routes.push(Entry { method, pattern, handler });
    }

    pub fn register_middleware(&mut self, method: String, pattern: String, handler: mlua::RegistryKey) {
        self.middleware.push(Entry { method, pattern, handler });
    }

    /// First matching route only, ignoring the middleware chain entirely —
    /// what the in-process test harness dispatches against (spec.md §4.9:
    /// "the test dispatcher bypasses middleware").
    pub fn match_route(&self, method: &str, path: &str) -> Option<(&mlua::RegistryKey, Vec<(String, String)>)> {
        for entry in &self.routes {
            if !method_matches(&entry.method, method) {
                continue;
            }
            if let Some(params) = pattern_matches(&entry.pattern, path) {
                return Some((&entry.handler, params));
            }
        }
        None
    }

    /// Serve one request end to end: guard the DB, walk the middleware
    /// chain, then dispatch to the first matching route.
    pub fn dispatch(&self, lua: &Lua, db: &Database, request: &RawRequest) -> RawResponse {
        if let Err(e) = db.guard_stale_txn() {
            error!(error = %e, "guard_stale_txn failed before dispatch");
            return error_response(500, "internal error");
        }

        let response = Rc::new(RefCell::new(RawResponse::new()));

        for entry in &self.middleware {
            let Some(params) = matched_params(entry, request) else {
                continue;
            };
            match self.call_handler(lua, entry, request, &params, &response) {
                Ok(0) => continue,
                Ok(_) => return response.borrow().clone(),
                Err(e) => {
                    error!(error = %e, method = %request.method, path = %request.path, "middleware raised an uncaught error");
                    return error_response(500, "internal error");
                }
            }
        }

        for entry in &self.routes {
            let Some(params) = matched_params(entry, request) else {
                continue;
            };
            return match self.call_handler(lua, entry, request, &params, &response) {
                Ok(_) => response.borrow().clone(),
                Err(e) => {
                    error!(error = %e, method = %request.method, path = %request.path, "handler raised an uncaught error");
                    error_response(500, "internal error")
                }
            };
        }

        warn!(method = %request.method, path = %request.path, "no route matched");
        error_response(404, "not found")
    }

    fn call_handler(
        &self,
        lua: &Lua,
        entry: &Entry,
        request: &RawRequest,
        params: &[(String, String)],
        response: &Rc<RefCell<RawResponse>>,
    ) -> Result<i64, HullError> {
        let handler: mlua::Function = lua
            .registry_value(&entry.handler)
            .map_err(|e| HullError::RuntimeError(e.to_string()))?;
        let req_table =
            request_to_lua(lua, request, params).map_err(|e| HullError::RuntimeError(e.to_string()))?;
        let resp_table =
            make_response_handle(lua, response.clone()).map_err(|e| HullError::RuntimeError(e.to_string()))?;
        let result: mlua::Value = handler
            .call((req_table, resp_table))
            .map_err(|e| HullError::RuntimeError(e.to_string()))?;
        Ok(match result {
            mlua::Value::Integer(n) => n,
            _ => 0,
        })
    }
}

fn matched_params(entry: &Entry, request: &RawRequest) -> Option<Vec<(String, String)>> {
    if !method_matches(&entry.method, &request.method) {
        return None;
    }
    pattern_matches(&entry.pattern, &request.path)
}

fn error_response(status: u16, body: &str) -> RawResponse {
    RawResponse {
        status,
        headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
        body: body.as_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn scratch_db() -> Database {
        Database::init(Path::new(":memory:")).unwrap()
    }

    fn register_handler(lua: &Lua, source: &str) -> mlua::RegistryKey {
        let f: mlua::Function = lua.load(source).eval().unwrap();
        lua.create_registry_value(f).unwrap()
    }

    fn simple_request(method: &str, path: &str) -> RawRequest {
        RawRequest {
            method: method.to_string(),
            path: path.to_string(),
            query: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn dispatches_to_the_first_matching_route() {
        let lua = Lua::new();
        let db = scratch_db();
        let mut dispatcher = Dispatcher::new();
        let handler = register_handler(&lua, r#"function(req, resp) resp.status(200); resp.write("ok") end"#);
        dispatcher.register_route("GET".to_string(), "/health".to_string(), handler);

        let response = dispatcher.dispatch(&lua, &db, &simple_request("GET", "/health"));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ok");
    }

    #[test]
    fn unmatched_request_returns_404() {
        let lua = Lua::new();
        let db = scratch_db();
        let dispatcher = Dispatcher::new();
        let response = dispatcher.dispatch(&lua, &db, &simple_request("GET", "/missing"));
        assert_eq!(response.status, 404);
    }

    #[test]
    fn middleware_short_circuits_on_nonzero_return() {
        let lua = Lua::new();
        let db = scratch_db();
        let mut dispatcher = Dispatcher::new();
        let blocking = register_handler(
            &lua,
            r#"function(req, resp) resp.status(429); resp.write("slow down"); return 1 end"#,
        );
        let handler = register_handler(&lua, r#"function(req, resp) resp.status(200); resp.write("ok") end"#);
        dispatcher.register_middleware("*".to_string(), "/*".to_string(), blocking);
        dispatcher.register_route("GET".to_string(), "/health".to_string(), handler);

        let response = dispatcher.dispatch(&lua, &db, &simple_request("GET", "/health"));
        assert_eq!(response.status, 429);
        assert_eq!(response.body, b"slow down");
    }

    #[test]
    fn middleware_returning_zero_falls_through_to_handler() {
        let lua = Lua::new();
        let db = scratch_db();
        let mut dispatcher = Dispatcher::new();
        let passthrough = register_handler(&lua, r#"function(req, resp) return 0 end"#);
        let handler = register_handler(&lua, r#"function(req, resp) resp.status(200); resp.write("ok") end"#);
        dispatcher.register_middleware("*".to_string(), "/*".to_string(), passthrough);
        dispatcher.register_route("GET".to_string(), "/health".to_string(), handler);

        let response = dispatcher.dispatch(&lua, &db, &simple_request("GET", "/health"));
        assert_eq!(response.status, 200);
    }

    #[test]
    fn uncaught_handler_error_becomes_500() {
        let lua = Lua::new();
        let db = scratch_db();
        let mut dispatcher = Dispatcher::new();
        let handler = register_handler(&lua, r#"function(req, resp) error("boom") end"#);
        dispatcher.register_route("GET".to_string(), "/crash".to_string(), handler);

        let response = dispatcher.dispatch(&lua, &db, &simple_request("GET", "/crash"));
        assert_eq!(response.status, 500);
    }

    #[test]
    fn stale_transaction_is_rolled_back_before_dispatch() {
        let lua = Lua::new();
        let db = scratch_db();
        db.exec("CREATE TABLE t (v INTEGER)", &[]).unwrap();
        db.begin().unwrap();
        db.exec("INSERT INTO t (v) VALUES (1)", &[]).unwrap();
        // Simulate a crashed prior request: never commits.

        let dispatcher = Dispatcher::new();
        dispatcher.dispatch(&lua, &db, &simple_request("GET", "/anything"));

        db.begin().unwrap();
        db.exec("INSERT INTO t (v) VALUES (2)", &[]).unwrap();
        db.commit().unwrap();
        let mut count = 0i64;
        db.query("SELECT COUNT(*) FROM t", &[], |cols| {
            count = cols[0].value.as_int().unwrap();
            hull_core::RowControl::Stop
        })
        .unwrap();
        assert_eq!(count, 1, "the stale insert should have been rolled back");
    }
}
