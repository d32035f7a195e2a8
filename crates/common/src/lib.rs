//! Common utilities shared across the bearer-gate workspace.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (size limits, segment decoding, time claims)
pub mod jwt;
