//! The store: schema, ledger, arena, and event bus in one place.
//!
//! # Invariants
//!
//! - Reads outside a transaction see the active state and nothing newer.
//! - Every handle-based read checks the handle's birth stamp against the
//!   active state's ancestry before resolving the id.
//! - History navigation never mutates entity copies; undo and redo move the
//!   cursor and nothing else.

use tracing::debug;

use varve_events::{CommitNotice, EventBus, Hook, Pattern, SubscriptionId};
use varve_types::{
    ChangeRecord, EntityId, Schema, SchemaError, Stamp, TypeDescriptor, Value,
};

use crate::access::Entity;
use crate::containers::{ListRef, MapRef, SetRef};
use crate::error::{StoreError, StoreResult};
use crate::record::Arena;
use crate::state::Ledger;
use crate::tx::OpenTx;
use crate::view::{self, StateDiff, StateView};

/// An in-memory, versioned entity store.
///
/// All data lives in states of the [`Ledger`]; entity copies are shared
/// between states until a transaction writes to them. The store owns the
/// event bus, so hooks and observers ride along with the data they watch.
#[derive(Debug)]
pub struct Store {
    pub(crate) schema: Schema,
    pub(crate) ledger: Ledger,
    pub(crate) arena: Arena,
    pub(crate) bus: EventBus,
    pub(crate) tx: Option<OpenTx>,
}

impl Store {
    /// A store over a compiled schema, holding only the empty genesis state.
    pub fn new(schema: Schema) -> Self {
        debug!(types = schema.type_count(), "store initialized");
        Self {
            schema,
            ledger: Ledger::new(),
            arena: Arena::new(),
            bus: EventBus::new(),
            tx: None,
        }
    }

    /// Compile descriptors and build a store over them.
    pub fn from_descriptors(types: Vec<TypeDescriptor>) -> Result<Self, SchemaError> {
        Ok(Self::new(Schema::compile(types)?))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    // -----------------------------------------------------------------------
    // States and history
    // -----------------------------------------------------------------------

    /// View of the active state.
    pub fn view(&self) -> StateView<'_> {
        StateView {
            store: self,
            state: self.ledger.current(),
            index: self.ledger.cursor(),
        }
    }

    /// View of the state at a ledger index.
    pub fn state_at(&self, index: usize) -> StoreResult<StateView<'_>> {
        let state = self
            .ledger
            .state_at(index)
            .ok_or(StoreError::UnknownState(index))?;
        Ok(StateView {
            store: self,
            state,
            index,
        })
    }

    /// Number of states in the ledger, the active one's successors included.
    pub fn state_count(&self) -> usize {
        self.ledger.len()
    }

    /// Ledger index of the active state.
    pub fn cursor(&self) -> usize {
        self.ledger.cursor()
    }

    /// Stamp of the active state.
    pub fn stamp(&self) -> Stamp {
        self.ledger.current().stamp()
    }

    /// Changes recorded by the transaction that produced the active state.
    pub fn changes(&self) -> &[ChangeRecord] {
        self.ledger.current().log()
    }

    /// Step the cursor back one state. Returns whether anything moved;
    /// `false` at the genesis state.
    pub fn undo(&mut self) -> StoreResult<bool> {
        if self.tx.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        Ok(self.ledger.undo())
    }

    /// Step the cursor forward one state. Returns whether anything moved;
    /// `false` with nothing left to redo.
    pub fn redo(&mut self) -> StoreResult<bool> {
        if self.tx.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        Ok(self.ledger.redo())
    }

    /// How many undo steps are available.
    pub fn undo_depth(&self) -> usize {
        self.ledger.undo_depth()
    }

    /// How many redo steps are available.
    pub fn redo_depth(&self) -> usize {
        self.ledger.redo_depth()
    }

    /// Entity-level difference between two states by ledger index.
    pub fn diff_states(&self, from: usize, to: usize) -> StoreResult<StateDiff> {
        let a = self
            .ledger
            .state_at(from)
            .ok_or(StoreError::UnknownState(from))?;
        let b = self
            .ledger
            .state_at(to)
            .ok_or(StoreError::UnknownState(to))?;
        Ok(view::diff(self, a, b))
    }

    // -----------------------------------------------------------------------
    // Reads against the active state
    // -----------------------------------------------------------------------

    /// Handle for an id, if live in the active state.
    pub fn get(&self, id: EntityId) -> Option<Entity> {
        self.handle_at(self.ledger.cursor(), id)
    }

    /// Like [`Store::get`], but an absent id is an error.
    pub fn entity(&self, id: EntityId) -> StoreResult<Entity> {
        self.get(id).ok_or(StoreError::UnknownEntity(id))
    }

    /// Whether an id is live in the active state.
    pub fn contains(&self, id: EntityId) -> bool {
        self.ledger.current().contains(id)
    }

    /// Number of live entities in the active state.
    pub fn entity_count(&self) -> usize {
        self.ledger.current().entity_count()
    }

    /// Type name of an entity.
    pub fn type_of(&self, target: Entity) -> StoreResult<&str> {
        self.check_live(target)?;
        self.view().type_of(target)
    }

    /// Raw value of a single-valued property.
    pub fn value(&self, target: Entity, property: &str) -> StoreResult<Option<Value>> {
        self.check_live(target)?;
        self.view().value(target, property)
    }

    /// Scalar property value.
    pub fn scalar(&self, target: Entity, property: &str) -> StoreResult<Option<Value>> {
        self.check_live(target)?;
        self.view().scalar(target, property)
    }

    /// Single-reference property resolved in the active state.
    pub fn reference(&self, target: Entity, property: &str) -> StoreResult<Option<Entity>> {
        self.check_live(target)?;
        self.view().reference(target, property)
    }

    /// Read view of a list property in the active state.
    pub fn list(&self, target: Entity, property: &str) -> StoreResult<ListRef<'_>> {
        self.check_live(target)?;
        self.view().list(target, property)
    }

    /// Read view of a set property in the active state.
    pub fn set(&self, target: Entity, property: &str) -> StoreResult<SetRef<'_>> {
        self.check_live(target)?;
        self.view().set(target, property)
    }

    /// Read view of a map property in the active state.
    pub fn map(&self, target: Entity, property: &str) -> StoreResult<MapRef<'_>> {
        self.check_live(target)?;
        self.view().map(target, property)
    }

    /// All entities of one type in the active state, oldest first.
    pub fn find(&self, type_name: &str) -> StoreResult<Vec<Entity>> {
        self.view().find(type_name)
    }

    /// Entities of one type passing a predicate, in the active state.
    pub fn find_where(
        &self,
        type_name: &str,
        pred: impl FnMut(Entity) -> bool,
    ) -> StoreResult<Vec<Entity>> {
        self.view().find_where(type_name, pred)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Register a before-hook for changes matching `pattern`. Returning
    /// [`Hook::Veto`] blocks the mutation and poisons its transaction.
    pub fn on_before(
        &mut self,
        pattern: Pattern,
        handler: impl Fn(&ChangeRecord) -> Hook + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on_before(pattern, handler)
    }

    /// Register an after-hook for changes matching `pattern`.
    pub fn on_after(
        &mut self,
        pattern: Pattern,
        handler: impl Fn(&ChangeRecord) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on_after(pattern, handler)
    }

    /// Register an observer for every change touching one entity.
    pub fn on_entity(
        &mut self,
        entity: EntityId,
        handler: impl Fn(&ChangeRecord) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on_entity(entity, handler)
    }

    /// Register an observer called once per committed transaction.
    pub fn on_commit(
        &mut self,
        handler: impl Fn(CommitNotice<'_>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on_commit(handler)
    }

    /// Drop a subscription. Returns whether one was found.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::InitObject;
    use varve_types::{
        ElementKind, Operation, PropertyDescriptor, RefSpec, ScalarKind, Shape,
    };

    fn library() -> Store {
        let types = vec![
            TypeDescriptor::new("Author")
                .with(PropertyDescriptor::scalar("name", ScalarKind::Str))
                .with(PropertyDescriptor::list(
                    "books",
                    ElementKind::Reference(
                        RefSpec::to("Book").with_inverse("author", Shape::Single),
                    ),
                )),
            TypeDescriptor::new("Book")
                .with(PropertyDescriptor::scalar("title", ScalarKind::Str))
                .with(PropertyDescriptor::scalar("pages", ScalarKind::Int))
                .with(PropertyDescriptor::reference(
                    "author",
                    RefSpec::to("Author").with_inverse("books", Shape::List),
                ))
                .with(PropertyDescriptor::set(
                    "tags",
                    ElementKind::Scalar(ScalarKind::Str),
                )),
        ];
        Store::from_descriptors(types).unwrap()
    }

    #[test]
    fn fresh_store_holds_only_genesis() {
        let store = library();
        assert_eq!(store.state_count(), 1);
        assert_eq!(store.cursor(), 0);
        assert_eq!(store.entity_count(), 0);
        assert_eq!(store.undo_depth(), 0);
        assert_eq!(store.redo_depth(), 0);
        assert!(store.changes().is_empty());
    }

    #[test]
    fn create_then_read_back() {
        let mut store = library();
        let author = store
            .create("Author", InitObject::new().with("name", "Ursula"))
            .unwrap();
        assert_eq!(store.state_count(), 2);
        assert_eq!(
            store.scalar(author, "name").unwrap(),
            Some(Value::from("Ursula"))
        );
        assert_eq!(store.type_of(author).unwrap(), "Author");
        assert_eq!(store.get(author.id()), Some(author));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut store = library();
        let err = store.create("Publisher", InitObject::new()).unwrap_err();
        assert_eq!(err, StoreError::UnknownType("Publisher".to_string()));
        // the failed transaction left nothing behind
        assert_eq!(store.state_count(), 1);
    }

    #[test]
    fn set_reference_maintains_inverse_list() {
        let mut store = library();
        let author = store.create("Author", InitObject::new()).unwrap();
        let book = store.create("Book", InitObject::new()).unwrap();
        store.set_reference(book, "author", Some(author)).unwrap();

        let books = store.list(author, "books").unwrap();
        assert_eq!(books.values(), vec![Value::Ref(book.id())]);
        let back = store.reference(book, "author").unwrap().unwrap();
        assert_eq!(back.id(), author.id());
    }

    #[test]
    fn undo_restores_and_redo_reapplies() {
        let mut store = library();
        let author = store
            .create("Author", InitObject::new().with("name", "before"))
            .unwrap();
        store.set_scalar(author, "name", "after").unwrap();

        assert!(store.undo().unwrap());
        assert_eq!(
            store.scalar(author, "name").unwrap(),
            Some(Value::from("before"))
        );
        assert!(store.redo().unwrap());
        assert_eq!(
            store.scalar(author, "name").unwrap(),
            Some(Value::from("after"))
        );
    }

    #[test]
    fn pushed_link_disappears_on_undo_and_returns_on_redo() {
        let mut store = library();
        let author = store.create("Author", InitObject::new()).unwrap();
        let book = store.create("Book", InitObject::new()).unwrap();

        store
            .update(|tx| tx.list(author, "books")?.push(book.id()))
            .unwrap();
        assert_eq!(
            store.list(author, "books").unwrap().values(),
            vec![Value::Ref(book.id())]
        );
        assert_eq!(
            store.reference(book, "author").unwrap().unwrap().id(),
            author.id()
        );

        store.undo().unwrap();
        assert!(store.list(author, "books").unwrap().is_empty());
        assert!(store.reference(book, "author").unwrap().is_none());

        store.redo().unwrap();
        assert_eq!(
            store.list(author, "books").unwrap().values(),
            vec![Value::Ref(book.id())]
        );
        assert_eq!(
            store.reference(book, "author").unwrap().unwrap().id(),
            author.id()
        );
    }

    #[test]
    fn undo_past_genesis_reports_false() {
        let mut store = library();
        assert!(!store.undo().unwrap());
        assert!(!store.redo().unwrap());
    }

    #[test]
    fn divergence_truncates_redo_and_stales_handles() {
        let mut store = library();
        let first = store.create("Author", InitObject::new()).unwrap();
        store.undo().unwrap();
        // diverge: the state that created `first` is dropped for good
        let second = store.create("Author", InitObject::new()).unwrap();

        assert_eq!(store.redo_depth(), 0);
        assert!(store.get(first.id()).is_none());
        match store.scalar(first, "name") {
            Err(StoreError::StaleReference { id, .. }) => assert_eq!(id, first.id()),
            other => panic!("expected stale reference, got {other:?}"),
        }
        // the surviving branch reads normally
        assert!(store.scalar(second, "name").unwrap().is_none());
    }

    #[test]
    fn deleted_entity_disappears_and_counterparts_forget_it() {
        let mut store = library();
        let author = store.create("Author", InitObject::new()).unwrap();
        let book = store.create("Book", InitObject::new()).unwrap();
        store.set_reference(book, "author", Some(author)).unwrap();

        store.delete(book).unwrap();
        assert!(store.get(book.id()).is_none());
        assert!(store.list(author, "books").unwrap().is_empty());
        assert_eq!(
            store.scalar(book, "title"),
            Err(StoreError::UnknownEntity(book.id()))
        );
    }

    #[test]
    fn deleting_the_referenced_side_clears_the_forward_slot() {
        let mut store = library();
        let author = store.create("Author", InitObject::new()).unwrap();
        let book = store.create("Book", InitObject::new()).unwrap();
        store.set_reference(book, "author", Some(author)).unwrap();

        store.delete(author).unwrap();
        assert!(store.reference(book, "author").unwrap().is_none());
        assert_eq!(store.value(book, "author").unwrap(), None);
    }

    #[test]
    fn historical_views_read_old_values() {
        let mut store = library();
        let author = store
            .create("Author", InitObject::new().with("name", "v1"))
            .unwrap();
        store.set_scalar(author, "name", "v2").unwrap();
        store.set_scalar(author, "name", "v3").unwrap();

        let old = store.state_at(2).unwrap();
        assert_eq!(
            old.scalar(author, "name").unwrap(),
            Some(Value::from("v2"))
        );
        // the active state is unaffected by reading history
        assert_eq!(
            store.scalar(author, "name").unwrap(),
            Some(Value::from("v3"))
        );
    }

    #[test]
    fn diff_states_classifies_entities() {
        let mut store = library();
        let keep = store.create("Author", InitObject::new()).unwrap();
        let gone = store.create("Author", InitObject::new()).unwrap();
        let before = store.cursor();
        store
            .update(|tx| {
                tx.set_scalar(keep, "name", "renamed")?;
                tx.delete(gone)?;
                tx.create("Book", InitObject::new())?;
                Ok(())
            })
            .unwrap();

        let diff = store.diff_states(before, store.cursor()).unwrap();
        assert_eq!(diff.modified, vec![keep.id()]);
        assert_eq!(diff.removed, vec![gone.id()]);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.change_count(), 3);
    }

    #[test]
    fn diff_skips_shared_copies() {
        let mut store = library();
        let a = store.create("Author", InitObject::new()).unwrap();
        let b = store.create("Author", InitObject::new()).unwrap();
        let before = store.cursor();
        store.set_scalar(a, "name", "only this one").unwrap();

        let diff = store.diff_states(before, store.cursor()).unwrap();
        assert_eq!(diff.modified, vec![a.id()]);
        assert!(!diff.removed.contains(&b.id()));
        assert!(diff.added.is_empty());
    }

    #[test]
    fn find_filters_by_type_in_creation_order() {
        let mut store = library();
        let a1 = store.create("Author", InitObject::new()).unwrap();
        let _b = store.create("Book", InitObject::new()).unwrap();
        let a2 = store.create("Author", InitObject::new()).unwrap();

        let authors = store.find("Author").unwrap();
        assert_eq!(
            authors.iter().map(Entity::id).collect::<Vec<_>>(),
            vec![a1.id(), a2.id()]
        );
        assert!(store.find("Publisher").is_err());
    }

    #[test]
    fn find_where_applies_predicate() {
        let mut store = library();
        store
            .create("Author", InitObject::new().with("name", "match"))
            .unwrap();
        store
            .create("Author", InitObject::new().with("name", "other"))
            .unwrap();

        let view = store.view();
        let matched = view
            .find_where("Author", |e| {
                view.scalar(e, "name").unwrap() == Some(Value::from("match"))
            })
            .unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn after_hooks_and_commit_observers_fire() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut store = library();
        let updates = Arc::new(AtomicUsize::new(0));
        let batches = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&updates);
        store.on_after(Pattern::any().operation(Operation::Update), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let seen = Arc::clone(&batches);
        store.on_commit(move |notice| {
            assert!(!notice.records.is_empty());
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let author = store.create("Author", InitObject::new()).unwrap();
        store.set_scalar(author, "name", "x").unwrap();
        store.set_scalar(author, "name", "y").unwrap();

        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert_eq!(batches.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn veto_blocks_the_mutation() {
        let mut store = library();
        let author = store.create("Author", InitObject::new()).unwrap();
        store.on_before(Pattern::any().operation(Operation::Delete), |_| Hook::Veto);

        assert_eq!(store.delete(author), Err(StoreError::TransactionVetoed));
        assert!(store.get(author.id()).is_some());
        // the vetoed transaction left no state behind
        assert_eq!(store.undo_depth(), 1);
    }

    #[test]
    fn unsubscribed_hooks_stay_silent() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut store = library();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = store.on_after(Pattern::any(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(store.unsubscribe(sub));
        assert!(!store.unsubscribe(sub));

        store.create("Author", InitObject::new()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn entity_subscription_follows_one_id() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut store = library();
        let watched = store.create("Author", InitObject::new()).unwrap();
        let other = store.create("Author", InitObject::new()).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        store.on_entity(watched.id(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.set_scalar(watched, "name", "a").unwrap();
        store.set_scalar(other, "name", "b").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn state_at_rejects_bad_index() {
        let store = library();
        assert!(matches!(
            store.state_at(7),
            Err(StoreError::UnknownState(7))
        ));
    }
}
