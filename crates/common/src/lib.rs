//! Types shared by the gclientauth library and its command-line front end

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
