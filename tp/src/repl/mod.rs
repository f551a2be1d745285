//! Interactive chat for document-authoring conversations
//!
//! `tp chat` wraps a [`ConversationEngine`](crate::conversation::ConversationEngine)
//! in a readline prompt. The engine never prints; [`ChatPrinter`] renders
//! its events as they arrive.

mod printer;
mod session;

pub use printer::{ChatPrinter, activity_line};
pub use session::ChatSession;
