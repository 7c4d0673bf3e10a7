//! Request parsing capability
//!
//! The grammar that recognizes `@agent`, subcommands, and `/command` syntax
//! lives with the host; the orchestrator only consumes its structured output.
//! [`PlainTextParser`] is the degenerate implementation for hosts without any
//! special syntax.

use crate::session::types::{InvocationLocation, ParsedMessage};

pub trait RequestParser: Send + Sync {
    fn parse(&self, session_id: &str, text: &str, location: InvocationLocation) -> ParsedMessage;
}

/// Parser that treats every message as a single text part
pub struct PlainTextParser;

impl RequestParser for PlainTextParser {
    fn parse(&self, _session_id: &str, text: &str, _location: InvocationLocation) -> ParsedMessage {
        ParsedMessage::plain(text)
    }
}
