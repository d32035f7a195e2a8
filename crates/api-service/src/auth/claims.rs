//! Verified token claims and the per-request auth context.
//!
//! Claims are kept as the raw JSON object so that claims this service does
//! not know about pass through untouched. The subject is redacted in Debug
//! output to prevent exposure in logs.

use crate::auth::error::AuthError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Claims of a token whose signature has been verified.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// The `sub` claim, if it is a non-empty string.
    pub fn subject(&self) -> Option<&str> {
        self.0
            .get("sub")
            .and_then(Value::as_str)
            .filter(|sub| !sub.is_empty())
    }

    /// The `exp` claim as Unix epoch seconds.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` if `exp` is present but not a number.
    pub fn expires_at(&self) -> Result<Option<i64>, AuthError> {
        self.numeric_date("exp")
    }

    /// The `nbf` claim as Unix epoch seconds.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` if `nbf` is present but not a number.
    pub fn not_before(&self) -> Result<Option<i64>, AuthError> {
        self.numeric_date("nbf")
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// NumericDate per RFC 7519: fractional seconds are floored.
    fn numeric_date(&self, name: &'static str) -> Result<Option<i64>, AuthError> {
        let Some(value) = self.0.get(name) else {
            return Ok(None);
        };

        let seconds = match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(floor_to_i64)),
            _ => None,
        };

        seconds.map(Some).ok_or_else(|| {
            tracing::debug!(target: "api.auth.jwt", claim = name, "Time claim is not a number");
            AuthError::MalformedToken
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn floor_to_i64(value: f64) -> i64 {
    // `as` saturates at the i64 bounds
    value.floor() as i64
}

/// Custom Debug implementation that redacts the `sub` claim.
impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.0 {
            if name == "sub" {
                map.entry(name, &"[REDACTED]");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}

/// Identity of an authenticated caller.
///
/// Created once per request by the auth gate and attached to the request by
/// the middleware. Never persisted.
#[derive(Clone)]
pub struct AuthContext {
    pub subject: String,
    pub claims: Claims,
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("subject", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish()
    }
}
