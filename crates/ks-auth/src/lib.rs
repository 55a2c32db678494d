//! Command authentication.
//!
//! Every inbound command batch carries an HMAC-SHA256 tag over a canonical
//! form of its key/value pairs. [`canon`] turns query strings and flat JSON
//! objects into that form; [`signature`] computes and checks the tag.

pub mod canon;
pub mod error;
pub mod signature;

pub use canon::{KeyValue, SignedRequest, TAG_KEY, canonicalize, format_float, parse_json, parse_query};
pub use error::{AuthError, AuthResult};
pub use signature::Authenticator;
