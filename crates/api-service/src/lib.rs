//! API Service Library
//!
//! A small HTTP API whose protected routes are guarded by bearer tokens
//! issued by an external identity provider. The interesting part is the
//! token verifier:
//!
//! - Fetching and caching the provider's published RSA key set
//! - Coalescing concurrent refreshes into a single fetch
//! - Reconstructing RSA public keys and verifying RS256/384/512 signatures
//! - Validating time claims and extracting the caller's subject
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> auth::AuthGate
//!     -> auth::SignatureVerifier -> auth::KeyResolver -> auth::KeySetCache
//!     -> auth::KeySetSource (HTTP)
//! ```
//!
//! # Modules
//!
//! - `auth` - Token verification core
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Auth and HTTP metrics middleware
//! - `observability` - Metrics recording
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
