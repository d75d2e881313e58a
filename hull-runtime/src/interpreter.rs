//! The interpreter host: a restricted Lua environment wired to the
//! capability layer (spec.md §4.7).
//!
//! Opens only the safe standard libraries, erases the unsafe globals,
//! replaces `print` with a stderr writer, and stores a back-pointer to
//! host state via `set_app_data` so capability bindings can recover
//! context — the single-threaded model (spec.md §5) means a plain `Rc`
//! reachable from the `Lua` instance is sufficient; there is no need for a
//! thread-local or a lock.

use crate::dispatcher::Dispatcher;
use hull_capability::Database;
use hull_core::{HullConfig, HullError};
use hull_sandbox::{Manifest, SharedManifest};
use mlua::{Lua, StdLib, VmState};
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::info;

/// Host state reachable from every capability binding through
/// `lua.app_data_ref::<Rc<HostState>>()`.
pub struct HostState {
    pub db: Rc<Database>,
    pub manifest: RefCell<SharedManifest>,
    pub dispatcher: RefCell<Dispatcher>,
    pub app_root: PathBuf,
    /// Instructions remaining before the interrupt hook aborts the call;
    /// reset to `gas_limit` at the start of every request.
    pub gas_remaining: Cell<u64>,
    pub gas_limit: Option<u64>,
}

const SAFE_STDLIB: StdLib = StdLib::COROUTINE
    .union(StdLib::TABLE)
    .union(StdLib::STRING)
    .union(StdLib::UTF8)
    .union(StdLib::MATH);

/// Erased after load: raw file I/O, OS access, and anything that can load
/// code from strings or files outside the restricted `require` below.
const ERASED_GLOBALS: &[&str] = &["io", "os", "dofile", "loadfile", "load", "loadstring"];

/// A pure-Lua standard library shipped with the interpreter, resolved by
/// name ahead of any filesystem lookup. Empty in this build; the hook
/// exists for spec.md §4.7's "names matching an embedded stdlib manifest".
const EMBEDDED_STDLIB: &[(&str, &str)] = &[];

const MAX_MODULE_BYTES: u64 = 1024 * 1024;

/// Build a fresh interpreter for one script load. `app_root` bounds where
/// `require` is allowed to read from.
pub fn new_interpreter(config: &HullConfig, db: Rc<Database>, app_root: PathBuf) -> Result<Lua, HullError> {
    let lua = Lua::new_with(SAFE_STDLIB, mlua::LuaOptions::new())
        .map_err(|e| HullError::RuntimeError(format!("interpreter init: {e}")))?;

    if let Some(max_heap_bytes) = config.max_heap_bytes {
        lua.set_memory_limit(max_heap_bytes as usize)
            .map_err(|e| HullError::RuntimeError(format!("setting memory limit: {e}")))?;
    }

    let globals = lua.globals();
    for name in ERASED_GLOBALS {
        globals.set(*name, mlua::Value::Nil).ok();
    }

    install_print(&lua)?;

    let host = Rc::new(HostState {
        db,
        manifest: RefCell::new(SharedManifest::from(Manifest::absent())),
        dispatcher: RefCell::new(Dispatcher::new()),
        app_root,
        gas_remaining: Cell::new(0),
        gas_limit: config.instruction_gas,
    });
    lua.set_app_data(host);

    install_require(&lua)?;
    install_interrupt(&lua);
    crate::bindings::install(&lua)?;

    info!(gas_limited = config.instruction_gas.is_some(), "interpreter initialized");
    Ok(lua)
}

fn install_print(lua: &Lua) -> Result<(), HullError> {
    let print = lua
        .create_function(|_, args: mlua::Variadic<mlua::Value>| {
            let line: Vec<String> = args
                .iter()
                .map(|v| v.to_string().unwrap_or_else(|_| format!("{v:?}")))
                .collect();
            eprintln!("{}", line.join("\t"));
            Ok(())
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;
    lua.globals()
        .set("print", print)
        .map_err(|e| HullError::RuntimeError(e.to_string()))
}

fn install_require(lua: &Lua) -> Result<(), HullError> {
    let app_root = lua
        .app_data_ref::<Rc<HostState>>()
        .expect("host state installed before require")
        .app_root
        .clone();

    let require = lua
        .create_function(move |lua, name: String| {
            if let Some((_, source)) = EMBEDDED_STDLIB.iter().find(|(n, _)| *n == name) {
                return lua.load(*source).set_name(&name).eval::<mlua::Value>();
            }

            if name.contains("..") {
                return Err(mlua::Error::RuntimeError("module path must not contain '..'".into()));
            }
            let candidate = app_root.join(format!("{name}.lua"));
            let canonical_root = app_root.canonicalize().map_err(mlua::Error::external)?;
            let canonical_candidate = candidate.canonicalize().map_err(mlua::Error::external)?;
            if !canonical_candidate.starts_with(&canonical_root) {
                return Err(mlua::Error::RuntimeError(
                    "module path escapes the application root".into(),
                ));
            }
            let metadata = std::fs::metadata(&canonical_candidate).map_err(mlua::Error::external)?;
            if metadata.len() > MAX_MODULE_BYTES {
                return Err(mlua::Error::RuntimeError("module exceeds the maximum module size".into()));
            }
            let source = std::fs::read_to_string(&canonical_candidate).map_err(mlua::Error::external)?;
            lua.load(&source).set_name(&name).eval::<mlua::Value>()
        })
        .map_err(|e| HullError::RuntimeError(e.to_string()))?;

    lua.globals()
        .set("require", require)
        .map_err(|e| HullError::RuntimeError(e.to_string()))
}

/// Cooperative preemption: when `gas_limit` is set, decrements the
/// per-request budget on every interrupt tick (mlua fires this
/// periodically as bytecode instructions execute) and aborts the call once
/// it reaches zero. A runaway handler still can't hang the event loop
/// forever when gas accounting is enabled.
fn install_interrupt(lua: &Lua) {
    lua.set_interrupt(|lua| {
        let Some(host) = lua.app_data_ref::<Rc<HostState>>() else {
            return Ok(VmState::Continue);
        };
        if host.gas_limit.is_none() {
            return Ok(VmState::Continue);
        }
        let remaining = host.gas_remaining.get();
        if remaining == 0 {
            return Err(mlua::Error::RuntimeError("instruction budget exceeded".into()));
        }
        host.gas_remaining.set(remaining - 1);
        Ok(VmState::Continue)
    });
}

/// Reset the per-request instruction budget; called once per dispatch.
pub fn reset_gas(lua: &Lua) {
    if let Some(host) = lua.app_data_ref::<Rc<HostState>>() {
        if let Some(limit) = host.gas_limit {
            host.gas_remaining.set(limit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config() -> HullConfig {
        let mut config = HullConfig::default();
        config.max_heap_bytes = Some(16 * 1024 * 1024);
        config
    }

    #[test]
    fn unsafe_globals_are_erased() {
        let db = Rc::new(Database::init(Path::new(":memory:")).unwrap());
        let lua = new_interpreter(&test_config(), db, std::env::temp_dir()).unwrap();
        let io_is_nil: bool = lua.load("return io == nil").eval().unwrap();
        assert!(io_is_nil);
        let os_is_nil: bool = lua.load("return os == nil").eval().unwrap();
        assert!(os_is_nil);
    }

    #[test]
    fn safe_stdlib_is_available() {
        let db = Rc::new(Database::init(Path::new(":memory:")).unwrap());
        let lua = new_interpreter(&test_config(), db, std::env::temp_dir()).unwrap();
        let sum: i64 = lua.load("return math.floor(1.5) + string.len('abc')").eval().unwrap();
        assert_eq!(sum, 4);
    }

    #[test]
    fn require_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let db = Rc::new(Database::init(Path::new(":memory:")).unwrap());
        let lua = new_interpreter(&test_config(), db, dir.path().to_path_buf()).unwrap();
        let result: mlua::Result<mlua::Value> = lua.load(r#"return require("../../etc/passwd")"#).eval();
        assert!(result.is_err());
    }

    #[test]
    fn require_loads_a_module_under_the_app_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greeting.lua"), "return \"hi\"").unwrap();
        let db = Rc::new(Database::init(Path::new(":memory:")).unwrap());
        let lua = new_interpreter(&test_config(), db, dir.path().to_path_buf()).unwrap();
        let value: String = lua.load(r#"return require("greeting")"#).eval().unwrap();
        assert_eq!(value, "hi");
    }

    #[test]
    fn gas_budget_aborts_a_runaway_loop() {
        let dir = tempfile::tempdir().unwrap();
        let db = Rc::new(Database::init(Path::new(":memory:")).unwrap());
        let mut config = test_config();
        config.instruction_gas = Some(1_000);
        let lua = new_interpreter(&config, db, dir.path().to_path_buf()).unwrap();
        reset_gas(&lua);
        let result: mlua::Result<()> = lua.load("while true do end").exec();
        assert!(result.is_err());
    }
}
