//! Core data model types: delivery records, templates, container views and
//! per-unit outcomes.

pub mod container;
pub mod delivery;
pub mod mail;
pub mod outcome;
pub mod template;
