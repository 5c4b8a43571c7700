mod channels;
mod health;
mod measurements;
mod taggers;

pub use channels::*;
pub use health::*;
pub use measurements::*;
pub use taggers::*;

use tagstream::{Handle, TagStreamError};

use crate::error::ApiError;

/// Parse a handle taken from the request path
pub(crate) fn parse_handle(raw: &str) -> Result<Handle, ApiError> {
    raw.parse::<Handle>().map_err(|_| {
        ApiError::Engine(TagStreamError::InvalidParameter(format!(
            "malformed handle '{}'",
            raw
        )))
    })
}
