//! `mailpool`: a pool of disposable mail-server containers.
//!
//! The crate launches SMTP server containers through a [`runtime::ContainerRuntime`],
//! keeps a per-container delivery log in a SQLite [`store::LogStore`], scrapes
//! delivered mail back out of container mailboxes, and runs templated send
//! campaigns.

pub mod campaign;
pub mod config;
pub mod error;
pub mod extractor;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod runtime;
pub mod store;
