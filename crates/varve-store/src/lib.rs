//! The Varve store: versioned entities with copy-on-write history.
//!
//! A [`Store`] keeps every entity in an append-only ledger of states. Each
//! committed transaction produces one new state; undo and redo move a cursor
//! across states without touching the data they share. Entity copies live in
//! a shared arena and are cloned at most once per transaction, so a state is
//! little more than an id-to-copy table plus the change log that produced it.
//!
//! # Key Types
//!
//! - [`Store`] -- schema, ledger, arena, and event bus in one place
//! - [`Entity`] -- copyable handle: id plus birth stamp
//! - [`Tx`] -- mutation surface of one open transaction
//! - [`StateView`] -- read-only view of any state, current or historical
//! - [`ListMut`], [`SetMut`], [`MapMut`] -- observable container writers
//! - [`InitObject`] -- initializer tree for entity creation
//!
//! # Design Rules
//!
//! 1. All mutation happens inside a transaction against a freshly opened
//!    state; the active state is frozen the moment it is committed.
//! 2. Reads resolve handles through the active state's table after checking
//!    the handle's birth stamp against the cursor's ancestry.
//! 3. Mutations that change nothing log nothing, fire nothing, and leave no
//!    state behind.
//! 4. Declared inverse relationships are maintained atomically with the
//!    owning edit, recorded silently, and never fire events of their own.
//! 5. Stamps are never reused; a handle from a truncated redo branch stays
//!    stale forever.

pub mod access;
pub mod containers;
pub mod error;
pub mod init;
mod inverse;
pub mod record;
pub mod state;
pub mod store;
pub mod tx;
pub mod view;

pub use access::Entity;
pub use containers::{ListMut, ListRef, MapMut, MapRef, SetMut, SetRef};
pub use error::{StoreError, StoreResult};
pub use init::{InitObject, InitValue};
pub use store::Store;
pub use tx::Tx;
pub use view::{StateDiff, StateView};

// The event surface rides along with the store.
pub use varve_events::{CommitNotice, EventBus, Hook, Pattern, SubscriptionId};
