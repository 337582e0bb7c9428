use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use varve_types::{ChangeRecord, EntityId, Stamp};

use crate::pattern::{candidate_keys, Pattern, PatternKey};

/// Decision returned by a before-hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hook {
    Proceed,
    Veto,
}

impl Hook {
    pub fn is_veto(self) -> bool {
        matches!(self, Hook::Veto)
    }
}

/// Handle for removing a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Summary of a committed transaction, delivered to commit observers.
///
/// Borrows the committed state's change log; observers that need the records
/// past the callback clone them.
#[derive(Clone, Copy, Debug)]
pub struct CommitNotice<'a> {
    /// Ledger index of the committed state.
    pub state: usize,
    pub stamp: Stamp,
    pub records: &'a [ChangeRecord],
}

type BeforeFn = Box<dyn Fn(&ChangeRecord) -> Hook + Send + Sync>;
type AfterFn = Box<dyn Fn(&ChangeRecord) + Send + Sync>;
type CommitFn = Box<dyn Fn(CommitNotice<'_>) + Send + Sync>;

/// Synchronous fan-out of change records to subscribers.
///
/// Subscriptions are keyed by their pattern; dispatch enumerates the wildcard
/// combinations of the record's own (operation, type, property) key and
/// invokes each matching bucket in registration order. Before-hooks run on
/// the prospective record and may veto it; after-hooks and entity
/// subscriptions run once the mutation is applied; commit observers see one
/// notice per committed transaction.
#[derive(Default)]
pub struct EventBus {
    before: BTreeMap<PatternKey, Vec<(SubscriptionId, BeforeFn)>>,
    after: BTreeMap<PatternKey, Vec<(SubscriptionId, AfterFn)>>,
    entity: BTreeMap<EntityId, Vec<(SubscriptionId, AfterFn)>>,
    commit: Vec<(SubscriptionId, CommitFn)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    /// Run `handler` before any mutation matching `pattern` is applied.
    /// Returning [`Hook::Veto`] cancels the enclosing transaction.
    pub fn on_before(
        &mut self,
        pattern: Pattern,
        handler: impl Fn(&ChangeRecord) -> Hook + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        debug!(%id, ?pattern, "before-hook registered");
        self.before
            .entry(pattern.key())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Run `handler` after any mutation matching `pattern` is applied.
    pub fn on_after(
        &mut self,
        pattern: Pattern,
        handler: impl Fn(&ChangeRecord) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        debug!(%id, ?pattern, "after-hook registered");
        self.after
            .entry(pattern.key())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Run `handler` after any mutation touching one entity.
    pub fn on_entity(
        &mut self,
        entity: EntityId,
        handler: impl Fn(&ChangeRecord) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        debug!(%id, %entity, "entity subscription registered");
        self.entity.entry(entity).or_default().push((id, Box::new(handler)));
        id
    }

    /// Run `handler` once per committed transaction.
    pub fn on_commit(
        &mut self,
        handler: impl Fn(CommitNotice<'_>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        debug!(%id, "commit observer registered");
        self.commit.push((id, Box::new(handler)));
        id
    }

    /// Remove a subscription. Returns `false` if the id is unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for bucket in self.before.values_mut() {
            let before_len = bucket.len();
            bucket.retain(|(sub, _)| *sub != id);
            removed |= bucket.len() != before_len;
        }
        for bucket in self.after.values_mut() {
            let before_len = bucket.len();
            bucket.retain(|(sub, _)| *sub != id);
            removed |= bucket.len() != before_len;
        }
        for bucket in self.entity.values_mut() {
            let before_len = bucket.len();
            bucket.retain(|(sub, _)| *sub != id);
            removed |= bucket.len() != before_len;
        }
        let before_len = self.commit.len();
        self.commit.retain(|(sub, _)| *sub != id);
        removed |= self.commit.len() != before_len;
        if removed {
            debug!(%id, "subscription removed");
        }
        removed
    }

    /// Offer a prospective record to before-hooks. Stops at the first veto.
    pub fn dispatch_before(&self, record: &ChangeRecord) -> Hook {
        for key in candidate_keys(record) {
            if let Some(bucket) = self.before.get(&key) {
                for (_, handler) in bucket {
                    if handler(record).is_veto() {
                        return Hook::Veto;
                    }
                }
            }
        }
        Hook::Proceed
    }

    /// Deliver an applied record to after-hooks and entity subscriptions.
    pub fn dispatch_after(&self, record: &ChangeRecord) {
        for key in candidate_keys(record) {
            if let Some(bucket) = self.after.get(&key) {
                for (_, handler) in bucket {
                    handler(record);
                }
            }
        }
        if let Some(bucket) = self.entity.get(&record.entity) {
            for (_, handler) in bucket {
                handler(record);
            }
        }
    }

    /// Deliver a commit notice to every commit observer.
    pub fn notify_commit(&self, notice: CommitNotice<'_>) {
        for (_, handler) in &self.commit {
            handler(notice);
        }
    }

    /// Number of active subscriptions across all registries.
    pub fn subscriber_count(&self) -> usize {
        self.before.values().map(Vec::len).sum::<usize>()
            + self.after.values().map(Vec::len).sum::<usize>()
            + self.entity.values().map(Vec::len).sum::<usize>()
            + self.commit.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use varve_types::{Operation, Value};

    fn record(type_name: &str, property: &str) -> ChangeRecord {
        ChangeRecord::replaced(
            EntityId::generate(),
            type_name,
            property,
            None,
            Some(Value::from(1i64)),
        )
    }

    #[test]
    fn wildcard_subscription_sees_all_records() {
        let mut bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        bus.on_after(Pattern::any(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch_after(&record("Author", "name"));
        bus.dispatch_after(&record("Book", "title"));
        bus.dispatch_after(&ChangeRecord::created(EntityId::generate(), "Book"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn specific_subscription_filters() {
        let mut bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        bus.on_after(
            Pattern::any().of_type("Author").on_property("name"),
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        bus.dispatch_after(&record("Author", "name"));
        bus.dispatch_after(&record("Author", "bio"));
        bus.dispatch_after(&record("Book", "name"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn before_hook_can_veto() {
        let mut bus = EventBus::new();
        bus.on_before(Pattern::any().operation(Operation::Update), |_| Hook::Veto);
        assert_eq!(bus.dispatch_before(&record("Author", "name")), Hook::Veto);
        assert_eq!(
            bus.dispatch_before(&ChangeRecord::created(EntityId::generate(), "Author")),
            Hook::Proceed
        );
    }

    #[test]
    fn veto_stops_remaining_hooks() {
        let mut bus = EventBus::new();
        let later = Arc::new(AtomicUsize::new(0));
        bus.on_before(Pattern::any().of_type("Author"), |_| Hook::Veto);
        let seen = later.clone();
        bus.on_before(Pattern::any(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Hook::Proceed
        });

        assert_eq!(bus.dispatch_before(&record("Author", "name")), Hook::Veto);
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn entity_subscription_is_scoped() {
        let mut bus = EventBus::new();
        let watched = EntityId::generate();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        bus.on_entity(watched, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let mut rec = record("Author", "name");
        rec.entity = watched;
        bus.dispatch_after(&rec);
        bus.dispatch_after(&record("Author", "name"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_silences_handler() {
        let mut bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = bus.on_after(Pattern::any(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        bus.dispatch_after(&record("Author", "name"));
        assert!(bus.unsubscribe(id));
        bus.dispatch_after(&record("Author", "name"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn commit_notice_carries_records() {
        let mut bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on_commit(move |notice| {
            sink.lock().unwrap().push((notice.state, notice.records.len()));
        });

        let records = vec![record("Author", "name"), record("Book", "title")];
        bus.notify_commit(CommitNotice {
            state: 3,
            stamp: Stamp::new(3),
            records: &records,
        });
        assert_eq!(seen.lock().unwrap().as_slice(), &[(3, 2)]);
    }

    #[test]
    fn registration_order_is_preserved_within_a_bucket() {
        let mut bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let sink = order.clone();
            bus.on_after(Pattern::any(), move |_| {
                sink.lock().unwrap().push(tag);
            });
        }

        bus.dispatch_after(&record("Author", "name"));
        assert_eq!(
            order.lock().unwrap().as_slice(),
            &["first", "second", "third"]
        );
    }
}
