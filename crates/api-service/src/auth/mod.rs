//! Bearer-token authentication.
//!
//! Leaves first: `jwks` fetches the published key set, `key_set_cache`
//! owns it, `key_resolver` turns a key ID into an RSA key, `verifier`
//! checks a compact token and `gate` ties it all to a header value.

pub mod claims;
pub mod error;
pub mod gate;
pub mod jwks;
pub mod key_resolver;
pub mod key_set_cache;
pub mod verifier;

pub use claims::{AuthContext, Claims};
pub use error::{AuthError, FetchError};
pub use gate::AuthGate;
pub use jwks::{HttpKeySetSource, KeyDescriptor, KeySet, KeySetSource};
pub use key_resolver::{KeyResolver, PublicKey};
pub use key_set_cache::{CacheState, KeySetCache};
pub use verifier::{RsaAlgorithm, SignatureVerifier};
