//! Purpose: Library crate behind the `thamos` CLI.
//! Exports: `config` (document schema, validation, loading), `api` (service client),
//! `template`, `discovery`, `stack`, `notice`, and `core` (errors).
//! Role: Reads `.thoth.yaml` and talks to the recommendation service on its behalf.
//! Invariants: Library code never prints; the binary owns stdout and stderr.
pub mod api;
pub mod config;
pub mod core;
pub mod discovery;
pub mod notice;
pub mod stack;
pub mod template;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
