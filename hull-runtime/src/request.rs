//! Request/response marshaling between raw bytes and interpreter values.
//!
//! Per spec.md §4.8's cyclic-reference note: the response body the script
//! writes is copied into a host-owned `RawResponse` as it's written, not
//! borrowed from interpreter state — so it survives after the script's
//! locals (and the `Lua` call frame) go away and the HTTP library can
//! write it at its own pace.

use mlua::{Lua, Table};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new() -> Self {
        RawResponse {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }
}

impl Default for RawResponse {
    fn default() -> Self {
        RawResponse::new()
    }
}

/// Build the read-only request table a handler or middleware function
/// receives as its first argument.
pub fn request_to_lua<'lua>(
    lua: &'lua Lua,
    request: &RawRequest,
    params: &[(String, String)],
) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    table.set("method", request.method.clone())?;
    table.set("path", request.path.clone())?;
    table.set("query", request.query.clone())?;

    let headers = lua.create_table()?;
    for (name, value) in &request.headers {
        headers.set(name.clone(), value.clone())?;
    }
    table.set("headers", headers)?;
    table.set("body", lua.create_string(&request.body)?)?;

    let params_table = lua.create_table()?;
    for (name, value) in params {
        params_table.set(name.clone(), value.clone())?;
    }
    table.set("params", params_table)?;

    Ok(table)
}

/// Build the response handle a handler or middleware function receives as
/// its second argument: `resp:status(code)`, `resp:header(name, value)`,
/// `resp:write(body)`. Every call copies straight into `response`.
pub fn make_response_handle<'lua>(lua: &'lua Lua, response: Rc<RefCell<RawResponse>>) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;

    let status_target = response.clone();
    table.set(
        "status",
        lua.create_function(move |_, code: u16| {
            status_target.borrow_mut().status = code;
            Ok(())
        })?,
    )?;

    let header_target = response.clone();
    table.set(
        "header",
        lua.create_function(move |_, (name, value): (String, String)| {
            header_target.borrow_mut().headers.push((name, value));
            Ok(())
        })?,
    )?;

    let write_target = response;
    table.set(
        "write",
        lua.create_function(move |_, body: mlua::String| {
            write_target.borrow_mut().body.extend_from_slice(body.as_bytes());
            Ok(())
        })?,
    )?;

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_table_carries_params_and_body() {
        let lua = Lua::new();
        let request = RawRequest {
            method: "GET".to_string(),
            path: "/orgs/acme".to_string(),
            query: Some("page=2".to_string()),
            headers: vec![("X-Test".to_string(), "1".to_string())],
            body: b"hello".to_vec(),
        };
        let table = request_to_lua(&lua, &request, &[("org_id".to_string(), "acme".to_string())]).unwrap();
        assert_eq!(table.get::<_, String>("method").unwrap(), "GET");
        let params: Table = table.get("params").unwrap();
        assert_eq!(params.get::<_, String>("org_id").unwrap(), "acme");
    }

    #[test]
    fn response_handle_writes_survive_past_the_lua_call() {
        let lua = Lua::new();
        let response = Rc::new(RefCell::new(RawResponse::new()));
        let handle = make_response_handle(&lua, response.clone()).unwrap();
        lua.globals().set("resp", handle).unwrap();
        lua.load(r#"resp.status(201); resp.header("X-Id", "7"); resp.write("created")"#)
            .exec()
            .unwrap();
        let final_response = response.borrow();
        assert_eq!(final_response.status, 201);
        assert_eq!(final_response.headers, vec![("X-Id".to_string(), "7".to_string())]);
        assert_eq!(final_response.body, b"created");
    }
}
