//! Typed client for the Pinata pinning service API and its gateway.
//!
//! Every method maps 1:1 onto one upstream HTTP call and returns the upstream
//! JSON with the `{"data": ...}` envelope removed.

pub mod client;
pub mod types;

pub use client::{
    DEFAULT_API_BASE_URL, DEFAULT_UPLOADS_BASE_URL, MAX_GATEWAY_CONTENT_BYTES, PinataClient,
    PinataClientError, PinataClientOptions,
};
pub use types::*;
