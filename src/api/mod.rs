//! Client-facing HTTP API

pub mod client_http;
