//! Parsing of raw mailbox files.

pub mod mime;
