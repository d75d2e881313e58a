//! The capability primitives: `db`, `fs`, `env`, `time`, `crypto`, `http` —
//! the only functions that perform effects. Every one of them returns a
//! plain `Result`; the `0`/`-1` sentinel contract spec.md §4.2 describes is
//! the shape `hull-runtime`'s Lua bindings present to script code, not the
//! shape these Rust APIs take internally.

pub mod crypto;
pub mod db;
pub mod env;
pub mod fs;
pub mod http_client;
pub mod http_parser;
pub mod time;

pub use db::Database;
pub use http_client::{ClientConfig, ClientResponse, RustlsConnector, TlsConnector};
pub use http_parser::{IncrementalHttpParser, ParseStatus, ParsedResponse, ParserLimits};
