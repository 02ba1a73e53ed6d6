//! Conversational surface: a thin command router over the campaign service.

pub mod router;
pub mod session;

pub use router::{Command, CommandParser, ConversationRouter};
pub use session::{Session, SessionStore};
