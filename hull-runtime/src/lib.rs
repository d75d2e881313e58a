//! The interpreter host, request dispatch, and middleware chain: the half
//! of the trust boundary that runs a loaded script and serves HTTP against
//! it (spec.md §4.7, §4.8).

pub mod bindings;
pub mod dispatcher;
pub mod interpreter;
pub mod request;
pub mod route;
pub mod server;

pub use dispatcher::Dispatcher;
pub use interpreter::{new_interpreter, reset_gas, HostState};
pub use request::{RawRequest, RawResponse};
pub use server::serve;
