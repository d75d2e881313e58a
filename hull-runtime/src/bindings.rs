//! Capability primitives exposed to script code (spec.md §4.2) plus the
//! route/middleware registration surface scripts use at load time.
//!
//! Every capability function here returns a sentinel on failure rather than
//! raising — `nil` (or `false`) in place of a value, optionally followed by
//! a second string return carrying the reason, so a script can choose to
//! ignore it entirely. Uncaught Lua errors are reserved for programmer
//! mistakes (wrong argument shape), not expected operational failures.

use crate::interpreter::HostState;
use hull_capability::{
    crypto, env as env_capability, fs as fs_capability, http_client, time as time_capability, RustlsConnector,
    TlsConnector,
};
use hull_core::{HullError, RowControl, Value};
use hull_sandbox::Manifest;
use mlua::{Lua, Table, Variadic};
use std::rc::Rc;

pub fn install(lua: &Lua) -> Result<(), HullError> {
    install_db(lua)?;
    install_fs(lua)?;
    install_env(lua)?;
    install_time(lua)?;
    install_crypto(lua)?;
    install_http(lua)?;
    install_routing(lua)?;
    Ok(())
}

fn host(lua: &Lua) -> Rc<HostState> {
    lua.app_data_ref::<Rc<HostState>>()
        .expect("host state installed before bindings")
        .clone()
}

fn to_mlua_err(e: HullError) -> mlua::Error {
    mlua::Error::RuntimeError(e.to_string())
}

fn hex_decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

/// Owned staging for a Lua value bound into a SQL parameter; `Value<'a>`
/// borrows from here for the one call.
enum OwnedParam {
    Nil,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

fn lua_to_owned(value: &mlua::Value) -> mlua::Result<OwnedParam> {
    Ok(match value {
        mlua::Value::Nil => OwnedParam::Nil,
        mlua::Value::Boolean(b) => OwnedParam::Bool(*b),
        mlua::Value::Integer(i) => OwnedParam::Int(*i),
        mlua::Value::Number(n) => OwnedParam::Real(*n),
        mlua::Value::String(s) => OwnedParam::Text(s.to_str()?.to_string()),
        other => {
            return Err(mlua::Error::RuntimeError(format!(
                "unsupported SQL parameter type: {}",
                other.type_name()
            )))
        }
    })
}

fn owned_to_value(owned: &OwnedParam) -> Value<'_> {
    match owned {
        OwnedParam::Nil => Value::Nil,
        OwnedParam::Int(i) => Value::Int(*i),
        OwnedParam::Real(f) => Value::Real(*f),
        OwnedParam::Text(s) => Value::Text(s),
        OwnedParam::Blob(b) => Value::Blob(b),
        OwnedParam::Bool(b) => Value::Bool(*b),
    }
}

fn value_to_lua<'lua>(lua: &'lua Lua, value: &Value<'_>) -> mlua::Result<mlua::Value<'lua>> {
    Ok(match value {
        Value::Nil => mlua::Value::Nil,
        Value::Int(i) => mlua::Value::Integer(*i),
        Value::Real(f) => mlua::Value::Number(*f),
        Value::Text(s) => mlua::Value::String(lua.create_string(s)?),
        Value::Blob(b) => mlua::Value::String(lua.create_string(b)?),
        Value::Bool(b) => mlua::Value::Boolean(*b),
    })
}

fn install_db(lua: &Lua) -> Result<(), HullError> {
    let db_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let exec = lua
        .create_function(|lua, (sql, params): (String, Variadic<mlua::Value>)| {
            let host = host(lua);
            let owned: Vec<OwnedParam> = params.iter().map(lua_to_owned).collect::<mlua::Result<_>>()?;
            let values: Vec<Value<'_>> = owned.iter().map(owned_to_value).collect();
            match host.db.exec(&sql, &values) {
                Ok(affected) => Ok(affected as i64),
                Err(e) => Err(to_mlua_err(e)),
            }
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    db_table.set("exec", exec).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let query = lua
        .create_function(|lua, (sql, params): (String, Variadic<mlua::Value>)| {
            let host = host(lua);
            let owned: Vec<OwnedParam> = params.iter().map(lua_to_owned).collect::<mlua::Result<_>>()?;
            let values: Vec<Value<'_>> = owned.iter().map(owned_to_value).collect();
            let rows = lua.create_table()?;
            let mut index = 1i64;
            let mut conversion_error = None;
            host.db
                .query(&sql, &values, |columns| {
                    let row = match lua.create_table() {
                        Ok(t) => t,
                        Err(e) => {
                            conversion_error = Some(e);
                            return RowControl::Stop;
                        }
                    };
                    for column in columns {
                        let lua_value = match value_to_lua(lua, &column.value) {
                            Ok(v) => v,
                            Err(e) => {
                                conversion_error = Some(e);
                                return RowControl::Stop;
                            }
                        };
                        if let Err(e) = row.set(column.name, lua_value) {
                            conversion_error = Some(e);
                            return RowControl::Stop;
                        }
                    }
                    if rows.raw_set(index, row).is_err() {
                        return RowControl::Stop;
                    }
                    index += 1;
                    RowControl::Continue
                })
                .map_err(to_mlua_err)?;
            if let Some(e) = conversion_error {
                return Err(e);
            }
            Ok(rows)
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    db_table.set("query", query).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let begin = lua
        .create_function(|lua, ()| host(lua).db.begin().map_err(to_mlua_err))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    db_table.set("begin", begin).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let commit = lua
        .create_function(|lua, ()| host(lua).db.commit().map_err(to_mlua_err))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    db_table.set("commit", commit).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let rollback = lua
        .create_function(|lua, ()| host(lua).db.rollback().map_err(to_mlua_err))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    db_table.set("rollback", rollback).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let last_id = lua
        .create_function(|lua, ()| Ok(host(lua).db.last_id()))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    db_table.set("last_id", last_id).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    lua.globals()
        .set("db", db_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))
}

fn current_manifest(host: &HostState) -> Manifest {
    (**host.manifest.borrow()).clone()
}

fn install_fs(lua: &Lua) -> Result<(), HullError> {
    let fs_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let read = lua
        .create_function(|lua, path: String| {
            let host = host(lua);
            match fs_capability::read(&current_manifest(&host), &path) {
                Ok(bytes) => Ok(mlua::Value::String(lua.create_string(&bytes)?)),
                Err(_) => Ok(mlua::Value::Nil),
            }
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    fs_table.set("read", read).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let write = lua
        .create_function(|lua, (path, body): (String, mlua::String)| {
            let host = host(lua);
            Ok(fs_capability::write(&current_manifest(&host), &path, body.as_bytes()).is_ok())
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    fs_table.set("write", write).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let exists = lua
        .create_function(|lua, path: String| {
            let host = host(lua);
            Ok(fs_capability::exists(&current_manifest(&host), &path).unwrap_or(false))
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    fs_table.set("exists", exists).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let delete = lua
        .create_function(|lua, path: String| {
            let host = host(lua);
            Ok(fs_capability::delete(&current_manifest(&host), &path).is_ok())
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    fs_table.set("delete", delete).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    lua.globals()
        .set("fs", fs_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))
}

fn install_env(lua: &Lua) -> Result<(), HullError> {
    let env_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let get = lua
        .create_function(|lua, name: String| {
            let host = host(lua);
            Ok(env_capability::get(&current_manifest(&host), &name))
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    env_table.set("get", get).map_err(|e| HullError::RuntimeError(e.to_string()))?;
    lua.globals()
        .set("env", env_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))
}

fn install_time(lua: &Lua) -> Result<(), HullError> {
    let time_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let now = lua
        .create_function(|_, ()| Ok(time_capability::now()))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    time_table.set("now", now).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let now_ms = lua
        .create_function(|_, ()| Ok(time_capability::now_ms()))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    time_table.set("now_ms", now_ms).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let monotonic_ms = lua
        .create_function(|_, ()| Ok(time_capability::monotonic_ms()))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    time_table
        .set("monotonic_ms", monotonic_ms)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let date = lua
        .create_function(|_, ()| {
            let mut buf = [0u8; 32];
            let n = time_capability::date(&mut buf).map_err(to_mlua_err)?;
            Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    time_table.set("date", date).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let datetime = lua
        .create_function(|_, ()| {
            let mut buf = [0u8; 32];
            let n = time_capability::datetime(&mut buf).map_err(to_mlua_err)?;
            Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    time_table.set("datetime", datetime).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    lua.globals()
        .set("time", time_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))
}

fn install_crypto(lua: &Lua) -> Result<(), HullError> {
    let crypto_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let sha256 = lua
        .create_function(|_, data: mlua::String| Ok(hex::encode(crypto::sha256(data.as_bytes()))))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table.set("sha256", sha256).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let hmac_sha256 = lua
        .create_function(|_, (key, data): (mlua::String, mlua::String)| {
            Ok(crypto::hmac_sha256(key.as_bytes(), data.as_bytes())
                .ok()
                .map(hex::encode))
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("hmac_sha256", hmac_sha256)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let random_bytes = lua
        .create_function(|lua, n: usize| {
            let mut buf = vec![0u8; n];
            crypto::random_bytes(&mut buf);
            lua.create_string(&buf)
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("random_bytes", random_bytes)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let constant_time_eq = lua
        .create_function(|_, (a, b): (mlua::String, mlua::String)| {
            Ok(crypto::constant_time_eq(a.as_bytes(), b.as_bytes()))
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("constant_time_eq", constant_time_eq)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let sha512 = lua
        .create_function(|_, data: mlua::String| Ok(hex::encode(crypto::sha512(data.as_bytes()))))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table.set("sha512", sha512).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let hmac_sha512_256 = lua
        .create_function(|_, (key, data): (mlua::String, mlua::String)| {
            Ok(crypto::hmac_sha512_256(key.as_bytes(), data.as_bytes())
                .ok()
                .map(hex::encode))
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("hmac_sha512_256", hmac_sha512_256)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let pbkdf2_hmac_sha256 = lua
        .create_function(|_, (password, salt, iterations, out_len): (mlua::String, mlua::String, u32, usize)| {
            let mut out = vec![0u8; out_len];
            match crypto::pbkdf2_hmac_sha256(password.as_bytes(), salt.as_bytes(), iterations, &mut out) {
                Ok(()) => Ok(Some(hex::encode(out))),
                Err(_) => Ok(None),
            }
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("pbkdf2_hmac_sha256", pbkdf2_hmac_sha256)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let ed25519_keypair = lua
        .create_function(|_, ()| {
            let (sk, pk) = crypto::ed25519_keypair();
            Ok((hex::encode(sk), hex::encode(pk)))
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("ed25519_keypair", ed25519_keypair)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let ed25519_sign = lua
        .create_function(|_, (secret_key, message): (String, mlua::String)| {
            let Some(sk) = hex_decode_fixed::<32>(&secret_key) else {
                return Ok(None);
            };
            Ok(Some(hex::encode(crypto::ed25519_sign(&sk, message.as_bytes()))))
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("ed25519_sign", ed25519_sign)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let ed25519_verify = lua
        .create_function(|_, (public_key, message, signature): (String, mlua::String, String)| {
            let (Some(pk), Some(sig)) = (hex_decode_fixed::<32>(&public_key), hex_decode_fixed::<64>(&signature))
            else {
                return Ok(false);
            };
            Ok(crypto::ed25519_verify(&pk, message.as_bytes(), &sig))
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("ed25519_verify", ed25519_verify)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let secretbox_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let secretbox_seal = lua
        .create_function(|_, (key, nonce, plaintext): (String, String, mlua::String)| {
            let (Some(key), Some(nonce)) = (hex_decode_fixed::<32>(&key), hex_decode_fixed::<24>(&nonce)) else {
                return Ok(None);
            };
            Ok(crypto::secretbox::seal(&key, &nonce, plaintext.as_bytes())
                .ok()
                .map(hex::encode))
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    secretbox_table
        .set("seal", secretbox_seal)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let secretbox_open = lua
        .create_function(|lua, (key, nonce, ciphertext): (String, String, String)| {
            let (Some(key), Some(nonce), Some(ciphertext)) = (
                hex_decode_fixed::<32>(&key),
                hex_decode_fixed::<24>(&nonce),
                hex::decode(&ciphertext).ok(),
            ) else {
                return Ok(None);
            };
            match crypto::secretbox::open(&key, &nonce, &ciphertext) {
                Ok(plaintext) => Ok(Some(lua.create_string(&plaintext)?)),
                Err(_) => Ok(None),
            }
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    secretbox_table
        .set("open", secretbox_open)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("secretbox", secretbox_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let publickeybox_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let publickeybox_seal = lua
        .create_function(
            |_, (their_public, my_secret, nonce, plaintext): (String, String, String, mlua::String)| {
                let (Some(their_public), Some(my_secret), Some(nonce)) = (
                    hex_decode_fixed::<32>(&their_public),
                    hex_decode_fixed::<32>(&my_secret),
                    hex_decode_fixed::<24>(&nonce),
                ) else {
                    return Ok(None);
                };
                Ok(crypto::publickeybox::seal(&their_public, &my_secret, &nonce, plaintext.as_bytes())
                    .ok()
                    .map(hex::encode))
            },
        )
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    publickeybox_table
        .set("seal", publickeybox_seal)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let publickeybox_open = lua
        .create_function(
            |lua, (their_public, my_secret, nonce, ciphertext): (String, String, String, String)| {
                let (Some(their_public), Some(my_secret), Some(nonce), Some(ciphertext)) = (
                    hex_decode_fixed::<32>(&their_public),
                    hex_decode_fixed::<32>(&my_secret),
                    hex_decode_fixed::<24>(&nonce),
                    hex::decode(&ciphertext).ok(),
                ) else {
                    return Ok(None);
                };
                match crypto::publickeybox::open(&their_public, &my_secret, &nonce, &ciphertext) {
                    Ok(plaintext) => Ok(Some(lua.create_string(&plaintext)?)),
                    Err(_) => Ok(None),
                }
            },
        )
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    publickeybox_table
        .set("open", publickeybox_open)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("publickeybox", publickeybox_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let base64url_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let base64url_encode = lua
        .create_function(|_, data: mlua::String| Ok(crypto::base64url::encode(data.as_bytes())))
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    base64url_table
        .set("encode", base64url_encode)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let base64url_decode = lua
        .create_function(|lua, data: String| match crypto::base64url::decode(&data) {
            Some(bytes) => Ok(Some(lua.create_string(&bytes)?)),
            None => Ok(None),
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    base64url_table
        .set("decode", base64url_decode)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table
        .set("base64url", base64url_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let jwt_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let jwt_sign = lua
        .create_function(|_, (header_json, payload_json, secret): (String, String, mlua::String)| {
            Ok(crypto::jwt::sign((&header_json, &payload_json), secret.as_bytes()).ok())
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    jwt_table.set("sign", jwt_sign).map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let jwt_verify = lua
        .create_function(|lua, (token, secret): (String, mlua::String)| {
            match crypto::jwt::verify(&token, secret.as_bytes()) {
                Some(payload) => Ok(Some(lua.create_string(&payload)?)),
                None => Ok(None),
            }
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    jwt_table.set("verify", jwt_verify).map_err(|e| HullError::RuntimeError(e.to_string()))?;
    crypto_table.set("jwt", jwt_table).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    lua.globals()
        .set("crypto", crypto_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))
}

fn install_http(lua: &Lua) -> Result<(), HullError> {
    let http_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let request = lua
        .create_function(
            |lua, (method, url, headers, body): (String, String, Option<Table>, Option<mlua::String>)| {
                let host = host(lua);
                let manifest = current_manifest(&host);
                let mut header_pairs = Vec::new();
                if let Some(table) = headers {
                    for pair in table.pairs::<String, String>() {
                        let (name, value) = pair?;
                        header_pairs.push((name, value));
                    }
                }
                let body_bytes = body.map(|s| s.as_bytes().to_vec()).unwrap_or_default();
                let config = http_client::ClientConfig::default();
                let tls = RustlsConnector::new().map_err(to_mlua_err)?;
                let tls: &dyn TlsConnector = &tls;
                match http_client::request(&config, &manifest, tls, &method, &url, &header_pairs, &body_bytes) {
                    Ok(response) => {
                        let result = lua.create_table()?;
                        result.set("status", response.status)?;
                        let response_headers = lua.create_table()?;
                        for (name, value) in &response.headers {
                            response_headers.set(name.clone(), value.clone())?;
                        }
                        result.set("headers", response_headers)?;
                        result.set("body", lua.create_string(&response.body)?)?;
                        Ok(mlua::Value::Table(result))
                    }
                    Err(_) => Ok(mlua::Value::Nil),
                }
            },
        )
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    http_table.set("request", request).map_err(|e| HullError::RuntimeError(e.to_string()))?;

    lua.globals()
        .set("http", http_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))
}

/// `route.get/post/put/delete/patch(pattern, handler)` and
/// `middleware.use(method, pattern, handler)` populate the dispatcher held
/// in host state; both are called only at script load time, before the
/// event loop starts.
fn install_routing(lua: &Lua) -> Result<(), HullError> {
    let route_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;
    for method in ["get", "post", "put", "delete", "patch"] {
        let http_method = method.to_ascii_uppercase();
        let registrar = lua
            .create_function(move |lua, (pattern, handler): (String, mlua::Function)| {
                let host = host(lua);
                let key = lua.create_registry_value(handler)?;
                host.dispatcher.borrow_mut().register_route(http_method.clone(), pattern, key);
                Ok(())
            })
            .map_err(|e| HullError::RuntimeError(e.to_string()))?;
        route_table.set(method, registrar).map_err(|e| HullError::RuntimeError(e.to_string()))?;
    }
    lua.globals()
        .set("route", route_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    let middleware_table = lua.create_table().map_err(|e| HullError::RuntimeError(e.to_string()))?;
    let use_fn = lua
        .create_function(|lua, (method, pattern, handler): (String, String, mlua::Function)| {
            let host = host(lua);
            let key = lua.create_registry_value(handler)?;
            host.dispatcher.borrow_mut().register_middleware(method, pattern, key);
            Ok(())
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    middleware_table.set("use", use_fn).map_err(|e| HullError::RuntimeError(e.to_string()))?;
    lua.globals()
        .set("middleware", middleware_table)
        .map_err(|e| HullError::RuntimeError(e.to_string()))
}
