#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! HTTP surface for the Sonara library service.
//!
//! Handlers are thin translations between the wire and the library
//! services: extract the principal and correlation id, call one service
//! operation, map the result onto JSON or an RFC 9457 problem response.
//! The presigned-URL receiver routes (`PUT /uploads/{key}`,
//! `GET /objects/{key}`) are the only unauthenticated surface; their HMAC
//! signature is the credential.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod rate_policy;
pub mod router;
pub mod state;

pub use router::ApiServer;
pub use state::ApiState;
