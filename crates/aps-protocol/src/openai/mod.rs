pub mod create_chat_completions;
pub mod error;

pub use error::{ErrorObject, ErrorResponse};
