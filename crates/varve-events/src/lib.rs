//! Event bus for Varve.
//!
//! Change records flow through a synchronous bus: before-hooks see the
//! prospective record and may veto it, after-hooks and entity subscriptions
//! see applied records, and commit observers receive one notice per
//! committed transaction.
//!
//! # Key Types
//!
//! - [`Pattern`] -- Wildcard filter over (operation, type, property)
//! - [`EventBus`] -- Keyed registries plus bounded-enumeration dispatch
//! - [`Hook`] -- Before-hook decision: proceed or veto
//! - [`CommitNotice`] -- Per-transaction batch summary
//!
//! # Invariants
//!
//! - Dispatch looks up at most eight registry keys per record; it never
//!   parses string patterns.
//! - Within one bucket, handlers run in registration order.
//! - A veto stops dispatch immediately; later hooks do not observe the
//!   vetoed record.

pub mod bus;
pub mod pattern;

pub use bus::{CommitNotice, EventBus, Hook, SubscriptionId};
pub use pattern::Pattern;
