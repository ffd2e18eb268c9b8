pub mod exam_client;
pub mod memory;
pub mod progress_channel;
pub mod sse;

pub use exam_client::{content_type_for, ExamApi, HttpExamClient};
pub use memory::{InMemoryExamApi, ScriptedTransport};
pub use progress_channel::{ChannelRequest, FirstOpen, MessageStream, ProgressTransport, SseTransport};
pub use sse::SseDecoder;
