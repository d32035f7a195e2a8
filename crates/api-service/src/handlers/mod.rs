//! HTTP request handlers for the API service.

pub mod health;
pub mod me;
pub mod metrics;
pub mod protected;
pub mod public;
pub mod verify;

pub use health::{health_check, readiness_check};
pub use me::get_me;
pub use metrics::metrics_handler;
pub use protected::protected_endpoint;
pub use public::public_endpoint;
pub use verify::verify_session;
