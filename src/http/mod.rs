//! HTTP collaborators
//!
//! Request/response types, the reqwest-backed transport, the request builder
//! and the authentication handles.

pub mod auth;
pub mod builder;
mod client;
mod request;
mod response;

pub use builder::{RawRequest, RequestBuilder, RequestDefaults};
pub use client::{HttpClient, HttpSettings, HttpTransport};
pub use request::{HttpMethod, PendingRequest, Request};
pub use response::Response;
