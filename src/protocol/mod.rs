//! FreeSWITCH event socket protocol handling
//!
//! Frame reading, event parsing and command construction. Frames are header
//! blocks terminated by an empty line with an optional `Content-Length` body;
//! `text/event-plain` bodies are header blocks with percent-encoded values.

pub mod commands;
mod event;
mod frame;
mod headers;

pub use event::{Event, EventKind};
pub use frame::{ContentType, Frame, FrameError, FrameReader, parse_header_block};
pub use headers::Headers;
