pub mod claude;
pub mod codec;
pub mod error;
pub mod ir;
pub mod model;
pub mod openai_chat;
pub mod stream;

pub use aps_protocol::ProtocolKind;
pub use codec::{
    ProtocolCodec, StreamDecoder, StreamEncoder, codec_for, from_intermediate,
    intermediate_to_client, to_intermediate, upstream_response_to_intermediate,
};
pub use error::TransformError;
pub use model::rewrite_model;
pub use stream::{StreamConverter, StreamErrorWatch};
