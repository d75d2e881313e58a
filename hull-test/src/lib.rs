//! The in-process test harness (spec.md §4.9): a variant dispatcher that
//! bypasses the middleware chain entirely and calls route handlers
//! directly against a synthesized request, plus the `test`/`eq`/`ok`/`err`
//! globals scripts use to register and assert.
//!
//! Registration and execution are two separate passes: running the
//! script populates `test(desc, fn)` registrations in Lua-registry order;
//! `run_registered` then calls each one sequentially, catching any Lua
//! error as a failed case rather than propagating it.

use hull_capability::Database;
use hull_runtime::request::{make_response_handle, request_to_lua, RawRequest, RawResponse};
use hull_runtime::{Dispatcher, HostState};
use mlua::{Lua, Table, Variadic};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{error, info};

/// One registered `test(desc, fn)` case, in registration order.
struct Case {
    description: String,
    body: mlua::RegistryKey,
}

/// Backing store for the `test`/`eq`/`ok`/`err` globals, reachable from
/// `lua.app_data_ref::<Rc<RefCell<TestRegistry>>>()`.
#[derive(Default)]
struct TestRegistry {
    cases: Vec<Case>,
}

#[derive(Debug, Clone)]
pub struct CaseResult {
    pub description: String,
    pub passed: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TestSummary {
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

/// Install `test`, `eq`, `ok`, `err`, and the bypass-middleware HTTP verbs
/// (`get`/`post`/`put`/`delete`/`patch`) as Lua globals. Call once, before
/// loading the test script; the script's top-level code registers cases by
/// calling `test(...)`, it does not run them.
pub fn install(lua: &Lua) -> mlua::Result<()> {
    let registry = Rc::new(RefCell::new(TestRegistry::default()));
    lua.set_app_data(registry);

    let test_fn = lua.create_function(|lua, (description, body): (String, mlua::Function)| {
        let registry = lua
            .app_data_ref::<Rc<RefCell<TestRegistry>>>()
            .expect("test registry installed before test()")
            .clone();
        let key = lua.create_registry_value(body)?;
        registry.borrow_mut().cases.push(Case { description, body: key });
        Ok(())
    })?;
    lua.globals().set("test", test_fn)?;

    let eq_fn = lua.create_function(|_, (actual, expected): (mlua::Value, mlua::Value)| {
        if lua_values_equal(&actual, &expected) {
            Ok(())
        } else {
            Err(mlua::Error::RuntimeError(format!(
                "eq failed: expected {expected:?}, got {actual:?}"
            )))
        }
    })?;
    lua.globals().set("eq", eq_fn)?;

    let ok_fn = lua.create_function(|_, (value, message): (bool, Option<String>)| {
        if value {
            Ok(())
        } else {
            Err(mlua::Error::RuntimeError(message.unwrap_or_else(|| "ok failed".to_string())))
        }
    })?;
    lua.globals().set("ok", ok_fn)?;

    let err_fn = lua.create_function(|_, result: mlua::Value| match result {
        mlua::Value::Nil => Ok(()),
        other => Err(mlua::Error::RuntimeError(format!("err expected nil, got {other:?}"))),
    })?;
    lua.globals().set("err", err_fn)?;

    install_verb(lua, "get")?;
    install_verb(lua, "post")?;
    install_verb(lua, "put")?;
    install_verb(lua, "delete")?;
    install_verb(lua, "patch")?;

    Ok(())
}

fn install_verb(lua: &Lua, verb: &str) -> mlua::Result<()> {
    let method = verb.to_ascii_uppercase();
    let func = lua.create_function(move |lua, (path, opts): (String, Option<Table>)| {
        let host = lua
            .app_data_ref::<Rc<HostState>>()
            .expect("host state installed before http verbs")
            .clone();
        let request = build_request(&method, &path, opts)?;
        let dispatcher = host.dispatcher.borrow();
        let response = dispatch_bypassing_middleware(&dispatcher, lua, &host.db, &request)?;
        response_to_lua(lua, &response)
    })?;
    lua.globals().set(verb, func)
}

fn build_request(method: &str, path: &str, opts: Option<Table>) -> mlua::Result<RawRequest> {
    let mut query = None;
    let mut headers = Vec::new();
    let mut body = Vec::new();

    if let Some(opts) = opts {
        if let Ok(Some(q)) = opts.get::<_, Option<String>>("query") {
            query = Some(q);
        }
        if let Ok(Some(table)) = opts.get::<_, Option<Table>>("headers") {
            for pair in table.pairs::<String, String>() {
                headers.push(pair?);
            }
        }
        if let Ok(Some(b)) = opts.get::<_, Option<mlua::String>>("body") {
            body = b.as_bytes().to_vec();
        }
    }

    Ok(RawRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        headers,
        body,
    })
}

/// The harness equivalent of `Dispatcher::dispatch`, minus the middleware
/// walk: find the first matching route and call it directly.
fn dispatch_bypassing_middleware(
    dispatcher: &Dispatcher,
    lua: &Lua,
    db: &Database,
    request: &RawRequest,
) -> mlua::Result<RawResponse> {
    if let Err(e) = db.guard_stale_txn() {
        return Err(mlua::Error::RuntimeError(e.to_string()));
    }

    let Some((handler, params)) = dispatcher.match_route(&request.method, &request.path) else {
        return Ok(RawResponse {
            status: 404,
            headers: Vec::new(),
            body: b"not found".to_vec(),
        });
    };

    let response = Rc::new(RefCell::new(RawResponse::new()));
    let handler_fn: mlua::Function = lua.registry_value(handler)?;
    let req_table = request_to_lua(lua, request, &params)?;
    let resp_table = make_response_handle(lua, response.clone())?;
    handler_fn.call::<_, mlua::Value>((req_table, resp_table))?;
    let final_response = response.borrow().clone();
    Ok(final_response)
}

fn response_to_lua<'lua>(lua: &'lua Lua, response: &RawResponse) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    table.set("status", response.status)?;
    let body_string = lua.create_string(&response.body)?;
    table.set("body", body_string)?;

    match std::str::from_utf8(&response.body)
        .ok()
        .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
    {
        Some(value) => table.set("json", json_to_lua(lua, &value)?)?,
        None => table.set("json", mlua::Value::Nil)?,
    }

    Ok(table)
}

/// Best-effort JSON decode for the `json` convenience field. Uses
/// `serde_json` rather than the application interpreter's own `load` (the
/// sandboxed host erases `load`/`loadstring` entirely, and reinstating
/// them just to decode a response body would be a much bigger hole than
/// the convenience is worth).
fn json_to_lua<'lua>(lua: &'lua Lua, value: &serde_json::Value) -> mlua::Result<mlua::Value<'lua>> {
    Ok(match value {
        serde_json::Value::Null => mlua::Value::Nil,
        serde_json::Value::Bool(b) => mlua::Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                mlua::Value::Integer(i)
            } else {
                mlua::Value::Number(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => mlua::Value::String(lua.create_string(s)?),
        serde_json::Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, item)?)?;
            }
            mlua::Value::Table(table)
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.set(key.clone(), json_to_lua(lua, item)?)?;
            }
            mlua::Value::Table(table)
        }
    })
}

fn lua_values_equal(a: &mlua::Value, b: &mlua::Value) -> bool {
    use mlua::Value::*;
    match (a, b) {
        (Nil, Nil) => true,
        (Boolean(x), Boolean(y)) => x == y,
        (Integer(x), Integer(y)) => x == y,
        (Number(x), Number(y)) => x == y,
        (Integer(x), Number(y)) | (Number(y), Integer(x)) => (*x as f64) == *y,
        (String(x), String(y)) => x.as_bytes() == y.as_bytes(),
        _ => false,
    }
}

/// Run every case registered by a prior `install` + script load, in
/// registration order. A case that raises (including a failed `eq`/`ok`)
/// counts as failed; nothing propagates past this call.
pub fn run_registered(lua: &Lua) -> TestSummary {
    let registry = match lua.app_data_ref::<Rc<RefCell<TestRegistry>>>() {
        Some(registry) => registry.clone(),
        None => return TestSummary::default(),
    };

    let mut summary = TestSummary::default();
    for case in &registry.borrow().cases {
        let outcome = run_one(lua, case);
        match &outcome.passed {
            true => {
                summary.passed += 1;
                info!(test = %case.description, "pass");
            }
            false => {
                summary.failed += 1;
                error!(test = %case.description, message = ?outcome.message, "fail");
            }
        }
        summary.results.push(outcome);
    }
    summary
}

fn run_one(lua: &Lua, case: &Case) -> CaseResult {
    let body: mlua::Result<mlua::Function> = lua.registry_value(&case.body);
    let result = match body {
        Ok(f) => f.call::<_, Variadic<mlua::Value>>(()),
        Err(e) => Err(e),
    };
    match result {
        Ok(_) => CaseResult {
            description: case.description.clone(),
            passed: true,
            message: None,
        },
        Err(e) => CaseResult {
            description: case.description.clone(),
            passed: false,
            message: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hull_capability::Database;
    use hull_core::HullConfig;
    use std::path::Path;

    fn harness() -> Lua {
        let config = HullConfig::default();
        let db = Rc::new(Database::init(Path::new(":memory:")).unwrap());
        let lua = hull_runtime::new_interpreter(&config, db, std::env::temp_dir()).unwrap();
        install(&lua).unwrap();
        lua
    }

    #[test]
    fn passing_assertions_are_recorded_as_pass() {
        let lua = harness();
        lua.load(r#"test("truth holds", function() eq(1 + 1, 2) end)"#).exec().unwrap();
        let summary = run_registered(&lua);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn failing_assertion_is_recorded_as_fail_not_propagated() {
        let lua = harness();
        lua.load(r#"test("false claim", function() eq(1, 2) end)"#).exec().unwrap();
        let summary = run_registered(&lua);
        assert_eq!(summary.passed, 0);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn get_bypasses_middleware_and_hits_the_route_directly() {
        let lua = harness();
        lua.load(
            r#"
            route.get("/ping", function(req, resp) resp.status(200); resp.write("pong") end)
            middleware.use("*", "/*", function(req, resp) resp.status(401); return 1 end)
            test("route reachable despite middleware", function()
                local r = get("/ping")
                eq(r.status, 200)
                eq(r.body, "pong")
            end)
            "#,
        )
        .exec()
        .unwrap();
        let summary = run_registered(&lua);
        assert_eq!(summary.passed, 1, "{:?}", summary.results);
    }

    #[test]
    fn unmatched_path_returns_404() {
        let lua = harness();
        lua.load(r#"test("missing route", function() eq(get("/nope").status, 404) end)"#)
            .exec()
            .unwrap();
        let summary = run_registered(&lua);
        assert_eq!(summary.passed, 1, "{:?}", summary.results);
    }
}
