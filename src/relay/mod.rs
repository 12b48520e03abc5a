//! Streaming relay: the completion adapter, the stream transcoder, and the
//! HTTP endpoint composing them behind the auth gate.

pub mod router;
pub mod transcode;
pub mod upstream;

pub use router::{AppState, CompletionInput, create_router};
pub use upstream::{
    ChatMessage, CompletionBackend, CompletionRequest, FragmentStream, OpenAiBackend,
};
