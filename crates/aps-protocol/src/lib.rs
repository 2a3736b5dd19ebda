pub mod claude;
pub mod kind;
pub mod openai;
pub mod sse;

pub use kind::ProtocolKind;
