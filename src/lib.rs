//! Bounded fan-out of external worker processes, plus a small recipient
//! mailer.
//!
//! [`runner::Runner`] launches one process per job input and never lets
//! more than a fixed number of them run at once.  [`mail`] sends a single
//! message to a list of recipients through a transactional-email API.

pub mod config;
pub mod job;
pub mod mail;
pub mod runner;
