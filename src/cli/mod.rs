//! CLI command implementations.

pub mod active;
pub mod config;
pub mod control;
pub mod create;
pub mod delete;
pub mod drivers;
pub mod inspect;
pub mod list;
pub mod ssh;

use hostkit::{Host, Store};

/// Load the named host, or the active one when no name is given.
pub fn resolve_host(store: &Store, name: Option<&str>) -> hostkit::Result<Host> {
    match name {
        Some(name) => store.load(name),
        None => store.active_or_default(),
    }
}
