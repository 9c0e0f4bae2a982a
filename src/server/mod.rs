//! Operator-facing servers: the control socket and the HTTP/SSE endpoint.

pub mod assets;
pub mod control;
pub mod http;

pub use control::{ControlCommand, ControlResponse, ControlServer};
pub use http::HttpServer;
