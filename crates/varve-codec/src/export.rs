//! Schema-aware graph export.
//!
//! Export walks declared reference properties from type metadata, never the
//! live object graph, so cycles are broken structurally by the visited set
//! and every entity is emitted at most once.

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use varve_store::{Entity, StateView, StoreError};
use varve_types::{EntityId, MapKey, PropertyKind, Value};

use crate::error::{CodecError, CodecResult};
use crate::record::ExportRecord;

/// Export the subgraph reachable from `roots`, breadth-first.
///
/// Every visited entity yields one record. Reference values whose target is
/// not live in the viewed state are dropped; unset and empty properties are
/// omitted. Fails with [`StoreError::UnknownEntity`] if a root is not live.
pub fn export(view: StateView<'_>, roots: &[EntityId]) -> CodecResult<Vec<ExportRecord>> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<EntityId> = roots.iter().copied().collect();
    let mut records = Vec::new();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        let entity = view.get(id).ok_or(StoreError::UnknownEntity(id))?;
        let (record, discovered) = record_for(view, entity)?;
        for next in discovered {
            if !visited.contains(&next) {
                queue.push_back(next);
            }
        }
        records.push(record);
    }

    debug!(records = records.len(), "graph exported");
    Ok(records)
}

/// Export every entity of the viewed state, in id order.
pub fn export_all(view: StateView<'_>) -> CodecResult<Vec<ExportRecord>> {
    let mut records = Vec::with_capacity(view.entity_count());
    for entity in view.entities() {
        let (record, _) = record_for(view, entity)?;
        records.push(record);
    }
    debug!(records = records.len(), "state exported");
    Ok(records)
}

/// Render records as pretty-printed JSON.
pub fn to_json_string(records: &[ExportRecord]) -> CodecResult<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

fn record_for(view: StateView<'_>, entity: Entity) -> CodecResult<(ExportRecord, Vec<EntityId>)> {
    let type_name = view.type_of(entity)?.to_string();
    let type_idx = view
        .schema()
        .type_idx(&type_name)
        .ok_or_else(|| CodecError::UnknownType(type_name.clone()))?;

    let mut record = ExportRecord::new(entity.id(), &type_name);
    let mut discovered = Vec::new();

    for (_, prop) in view.schema().type_at(type_idx).props() {
        match &prop.kind {
            PropertyKind::Scalar(_) | PropertyKind::Reference(_) => {
                if let Some(value) = view.value(entity, &prop.name)? {
                    if let Some(json) = element_to_json(view, &value, &mut discovered) {
                        record.values.insert(prop.name.clone(), json);
                    }
                }
            }
            PropertyKind::List(_) => {
                let items: Vec<_> = view
                    .list(entity, &prop.name)?
                    .iter()
                    .filter_map(|v| element_to_json(view, v, &mut discovered))
                    .collect();
                if !items.is_empty() {
                    record
                        .values
                        .insert(prop.name.clone(), serde_json::Value::Array(items));
                }
            }
            PropertyKind::Set(_) => {
                // BTreeSet iteration keeps the exported array sorted.
                let items: Vec<_> = view
                    .set(entity, &prop.name)?
                    .iter()
                    .filter_map(|v| element_to_json(view, v, &mut discovered))
                    .collect();
                if !items.is_empty() {
                    record
                        .values
                        .insert(prop.name.clone(), serde_json::Value::Array(items));
                }
            }
            PropertyKind::Map { .. } => {
                let mut object = serde_json::Map::new();
                for (key, value) in view.map(entity, &prop.name)?.iter() {
                    if let Some(json) = element_to_json(view, value, &mut discovered) {
                        object.insert(map_key_string(key), json);
                    }
                }
                if !object.is_empty() {
                    record
                        .values
                        .insert(prop.name.clone(), serde_json::Value::Object(object));
                }
            }
        }
    }

    Ok((record, discovered))
}

/// Render one stored value. References to entities absent from the viewed
/// state return `None` and are dropped by the caller.
fn element_to_json(
    view: StateView<'_>,
    value: &Value,
    discovered: &mut Vec<EntityId>,
) -> Option<serde_json::Value> {
    match value {
        Value::Ref(id) => {
            if view.contains(*id) {
                discovered.push(*id);
                Some(serde_json::Value::String(id.to_string()))
            } else {
                None
            }
        }
        Value::Bool(b) => Some(serde_json::Value::from(*b)),
        Value::Int(n) => Some(serde_json::Value::from(*n)),
        // Non-finite floats have no JSON number form; serde_json renders null.
        Value::Float(x) => Some(serde_json::Value::from(*x)),
        Value::Str(s) => Some(serde_json::Value::from(s.as_str())),
    }
}

fn map_key_string(key: &MapKey) -> String {
    match key {
        MapKey::Str(s) => s.clone(),
        MapKey::Id(id) => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varve_store::{InitObject, Store};
    use varve_types::{
        ElementKind, MapKeyKind, PropertyDescriptor, RefSpec, ScalarKind, Shape, TypeDescriptor,
    };

    fn catalog() -> Store {
        let types = vec![
            TypeDescriptor::new("Author")
                .with(PropertyDescriptor::scalar("name", ScalarKind::Str))
                .with(PropertyDescriptor::list(
                    "books",
                    ElementKind::Reference(
                        RefSpec::to("Book").with_inverse("author", Shape::Single),
                    ),
                ))
                .with(PropertyDescriptor::map(
                    "index",
                    MapKeyKind::Id,
                    ElementKind::Scalar(ScalarKind::Str),
                )),
            TypeDescriptor::new("Book")
                .with(PropertyDescriptor::scalar("title", ScalarKind::Str))
                .with(PropertyDescriptor::scalar("rating", ScalarKind::Float))
                .with(PropertyDescriptor::reference(
                    "author",
                    RefSpec::to("Author").with_inverse("books", Shape::List),
                ))
                .with(PropertyDescriptor::reference("sequel", RefSpec::to("Book")))
                .with(PropertyDescriptor::set(
                    "tags",
                    ElementKind::Scalar(ScalarKind::Str),
                ))
                .with(PropertyDescriptor::map(
                    "meta",
                    MapKeyKind::Str,
                    ElementKind::Scalar(ScalarKind::Str),
                )),
        ];
        Store::from_descriptors(types).expect("schema compiles")
    }

    fn linked_pair() -> (Store, Entity, Entity) {
        let mut store = catalog();
        let author = store
            .create("Author", InitObject::new().with("name", "Ursula"))
            .expect("author");
        let book = store
            .create("Book", InitObject::new().with("title", "The Dispossessed"))
            .expect("book");
        store
            .update(|tx| tx.list(author, "books")?.push(book.id()))
            .expect("link");
        (store, author, book)
    }

    #[test]
    fn exports_scalars_and_omits_unset() {
        let mut store = catalog();
        let book = store
            .create("Book", InitObject::new().with("title", "Dune"))
            .unwrap();
        let records = export(store.view(), &[book.id()]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].values["title"], serde_json::json!("Dune"));
        assert!(!records[0].values.contains_key("rating"));
        assert!(!records[0].values.contains_key("tags"));
    }

    #[test]
    fn fresh_entity_exports_empty_values() {
        let mut store = catalog();
        let author = store.create("Author", InitObject::new()).unwrap();
        let records = export(store.view(), &[author.id()]).unwrap();
        assert!(records[0].values.is_empty());
    }

    #[test]
    fn follows_references_breadth_first() {
        let (store, author, book) = linked_pair();
        let records = export(store.view(), &[author.id()]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, author.id());
        assert_eq!(records[1].id, book.id());
        assert_eq!(
            records[0].values["books"],
            serde_json::json!([book.id().to_string()])
        );
        assert_eq!(
            records[1].values["author"],
            serde_json::json!(author.id().to_string())
        );
    }

    #[test]
    fn cyclic_graph_exports_each_entity_once() {
        // The inverse pair is a two-entity cycle; starting from either end
        // must terminate with exactly two records.
        let (store, author, book) = linked_pair();
        let records = export(store.view(), &[book.id()]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, book.id());
        assert_eq!(records[1].id, author.id());
    }

    #[test]
    fn dangling_reference_is_dropped() {
        let mut store = catalog();
        let first = store
            .create("Book", InitObject::new().with("title", "A"))
            .unwrap();
        let second = store
            .create("Book", InitObject::new().with("title", "B"))
            .unwrap();
        store.set_reference(first, "sequel", Some(second)).unwrap();
        // sequel declares no inverse, so deleting the target leaves the
        // forward slot dangling.
        store.delete(second).unwrap();

        let records = export(store.view(), &[first.id()]).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].values.contains_key("sequel"));
    }

    #[test]
    fn sets_export_as_sorted_arrays() {
        let mut store = catalog();
        let book = store.create("Book", InitObject::new()).unwrap();
        store
            .update(|tx| {
                let mut tags = tx.set(book, "tags")?;
                tags.insert("utopia")?;
                tags.insert("anarres")?;
                tags.insert("solar")?;
                Ok(())
            })
            .unwrap();
        let records = export(store.view(), &[book.id()]).unwrap();
        assert_eq!(
            records[0].values["tags"],
            serde_json::json!(["anarres", "solar", "utopia"])
        );
    }

    #[test]
    fn maps_export_as_objects() {
        let mut store = catalog();
        let book = store.create("Book", InitObject::new()).unwrap();
        store
            .update(|tx| tx.map(book, "meta")?.insert("language", "en"))
            .unwrap();
        let records = export(store.view(), &[book.id()]).unwrap();
        assert_eq!(
            records[0].values["meta"],
            serde_json::json!({"language": "en"})
        );
    }

    #[test]
    fn id_keyed_maps_use_uuid_strings() {
        let (mut store, author, book) = linked_pair();
        store
            .update(|tx| tx.map(author, "index")?.insert(book.id(), "The Dispossessed"))
            .unwrap();
        let records = export(store.view(), &[author.id()]).unwrap();
        let expected = serde_json::json!({ (book.id().to_string()): "The Dispossessed" });
        assert_eq!(records[0].values["index"], expected);
    }

    #[test]
    fn non_finite_float_renders_null() {
        let mut store = catalog();
        let book = store.create("Book", InitObject::new()).unwrap();
        store.set_scalar(book, "rating", f64::NAN).unwrap();
        let records = export(store.view(), &[book.id()]).unwrap();
        assert_eq!(records[0].values["rating"], serde_json::Value::Null);
    }

    #[test]
    fn export_all_emits_in_id_order() {
        let (store, author, book) = linked_pair();
        let records = export_all(store.view()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, author.id());
        assert_eq!(records[1].id, book.id());
        assert!(records[0].id < records[1].id);
    }

    #[test]
    fn unknown_root_fails() {
        let store = catalog();
        let err = export(store.view(), &[EntityId::generate()]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Store(StoreError::UnknownEntity(_))
        ));
    }

    #[test]
    fn historical_view_exports_old_values() {
        let (mut store, _author, book) = linked_pair();
        let before = store.cursor();
        store.set_scalar(book, "title", "Renamed").unwrap();

        let old = export(store.state_at(before).unwrap(), &[book.id()]).unwrap();
        assert_eq!(old[0].values["title"], serde_json::json!("The Dispossessed"));
        let new = export(store.view(), &[book.id()]).unwrap();
        assert_eq!(new[0].values["title"], serde_json::json!("Renamed"));
    }
}
