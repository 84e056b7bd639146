//! MCP server exposing the Pinata pinning API as tools.
//!
//! HTTP requests pass the API-key gate, are resolved to a session by
//! [`router::SessionRouter`] and handled by that session's connection, which
//! dispatches tool calls into [`tools::PinataTools`].

pub mod auth;
pub mod framing;
pub mod http;
pub mod router;
pub mod session;
pub mod stdio;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::ApiKeyGate;
pub use http::{HttpOptions, HttpState, build_app, serve};
pub use router::{CloseHook, RouteError, SessionRouter};
pub use session::SessionStore;
pub use tools::PinataTools;
