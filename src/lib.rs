//! Multi-identity workspace dashboard core.
//!
//! A session carries several linked emails, each with its own view of the
//! workspaces it can reach. This crate aggregates those views into one
//! snapshot, resolves which email acts for each workspace, drives the member
//! invitation lifecycle and personal reminders, pages the result per email,
//! and keeps cached queries in step with every successful mutation.

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod invitation;
pub mod logging;
pub mod members;
pub mod owner;
pub mod pagination;
pub mod registry;
pub mod reminders;
pub mod snapshot;
pub mod state;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::DeckError;
pub use state::{Dashboard, ViewTicket};
