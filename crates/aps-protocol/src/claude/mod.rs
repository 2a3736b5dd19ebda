pub mod create_message;
pub mod error;
pub mod types;

pub use error::{ErrorDetail, ErrorResponse};
pub use types::*;
