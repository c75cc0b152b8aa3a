//! Small helpers shared by the normalizer, the filter model and the config layer.
//!
//! - **Identity parsing**: textual principal validation for creator/root filters
//! - **Endpoint validation**: upstream base URLs must be HTTPS (loopback excepted)
//! - **Text**: control-character stripping and excerpts for untitled items

mod endpoint;
mod identity;
mod text;

pub use endpoint::{validate_endpoint, EndpointError};
pub use identity::{parse_identity, Identity, MalformedFilterError};
pub use text::{excerpt, sanitize};
