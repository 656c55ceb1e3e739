//! Negotiation with out-of-process converters.
//!
//! External converters are arbitrary executables answering three verbs:
//!
//! | Verb | Success | Meaning of failure |
//! |------|---------|--------------------|
//! | `ping` | exit 0 and body `pong` | converter unavailable this run |
//! | `describe` | exit 0 and a YAML descriptor | non-zero exit or bad body: hard error; empty body: temporarily unavailable |
//! | `convert` | exit 0 | candidate failed, try the next one |
//!
//! Control verbs are bounded by a short timeout (10 s by default); `convert`
//! gets a separate, longer one (300 s) because real conversions can be slow.
//!
//! 1. [`command`] — bounded, cancellable process execution
//! 2. [`client`]  — the [`ExternalConverter`] adapter implementing
//!    [`crate::converter::Converter`]

pub mod client;
pub mod command;

pub use client::ExternalConverter;
pub use command::{DEFAULT_CONTROL_TIMEOUT, DEFAULT_CONVERT_TIMEOUT};
