//! # tds
//!
//! Library target of the TDS binary: the HTTP API, the CLI and the
//! application configuration. Integration tests reach the router through
//! `tds::api`.

pub mod api;
pub mod cli;
pub mod config;
