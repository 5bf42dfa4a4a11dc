mod chat_session;
mod message;
mod project;

pub use chat_session::{ChatSession, ChatSessionStatus};
pub use message::{Message, MessageRole, FILE_OP_MARKER};
pub use project::Project;
