//! # API Test Utilities
//!
//! Shared test utilities for the API service.
//!
//! This crate provides:
//! - Deterministic RSA signing keys with matching JWKs (`crypto_fixtures`)
//! - A claims builder for test tokens (`token_builders`)
//! - A server harness backed by a mock key set endpoint (`server_harness`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use api_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let server = TestApiServer::spawn().await?;
//!     let token = test_key().sign(TEST_KID, &TestClaimsBuilder::new().build());
//!
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/api/protected", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
