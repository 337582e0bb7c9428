//! JSON operation scripts.
//!
//! A script is a JSON array of operation objects, each tagged by an `"op"`
//! field. `create` can bind the new entity to a script-local name with
//! `"as"`; later operations refer to entities by bound name or by raw id
//! string, and reference values inside initializers resolve the same way.
//! Each operation commits as its own transaction, so a run leaves one
//! ledger state per effective operation and `undo` steps back exactly one
//! script line.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use tracing::debug;

use varve_store::{Entity, Store};
use varve_types::{
    ElementKind, EntityId, MapKey, MapKeyKind, PropertyKind, RefSpec, ScalarKind, Shape, Value,
};

/// One operation as written in a script file.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptOp {
    /// Create an entity, optionally binding it to a name with `as`.
    Create {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(rename = "as")]
        name: Option<String>,
        values: Option<serde_json::Value>,
    },
    /// Set a single-valued property; `null` clears it.
    Set {
        entity: String,
        property: String,
        value: serde_json::Value,
    },
    /// Clear a property of any shape back to unset or empty.
    Clear { entity: String, property: String },
    /// Append to a list property.
    Push {
        entity: String,
        property: String,
        value: serde_json::Value,
    },
    /// Insert into a set (no key) or map (with key) property.
    Insert {
        entity: String,
        property: String,
        key: Option<serde_json::Value>,
        value: serde_json::Value,
    },
    /// Remove from a container: lists by `index`, sets by `value`, maps by
    /// `key`.
    Remove {
        entity: String,
        property: String,
        index: Option<usize>,
        key: Option<serde_json::Value>,
        value: Option<serde_json::Value>,
    },
    /// Delete an entity.
    Delete { entity: String },
    /// Step the cursor one state back.
    Undo,
    /// Step the cursor one state forward.
    Redo,
}

/// Parse a script file's text into operations.
pub fn parse(text: &str) -> anyhow::Result<Vec<ScriptOp>> {
    serde_json::from_str(text).context("parsing operation script")
}

/// Apply `ops` to `store` in order.
///
/// Names bound by earlier operations are visible to later ones. The first
/// failing operation aborts the run; everything before it has already
/// committed, the failing operation itself has not.
pub fn run(store: &mut Store, ops: &[ScriptOp]) -> anyhow::Result<()> {
    let mut names = BTreeMap::new();
    for (index, op) in ops.iter().enumerate() {
        apply(store, &mut names, op).with_context(|| format!("script operation {index}"))?;
    }
    debug!(
        operations = ops.len(),
        states = store.state_count(),
        "script applied"
    );
    Ok(())
}

fn apply(
    store: &mut Store,
    names: &mut BTreeMap<String, Entity>,
    op: &ScriptOp,
) -> anyhow::Result<()> {
    match op {
        ScriptOp::Create {
            type_name,
            name,
            values,
        } => {
            let empty = serde_json::Value::Object(serde_json::Map::new());
            let init = resolve_init(store, names, type_name, values.as_ref().unwrap_or(&empty))?;
            let handle = store.update(|tx| tx.create_from_json(type_name, &init))?;
            if let Some(name) = name {
                names.insert(name.clone(), handle);
            }
        }
        ScriptOp::Set {
            entity,
            property,
            value,
        } => {
            let target = resolve_entity(store, names, entity)?;
            match property_kind(store, target, property)? {
                PropertyKind::Scalar(kind) => {
                    if value.is_null() {
                        store.clear(target, property)?;
                    } else {
                        let v = scalar_value(kind, value)
                            .ok_or_else(|| anyhow!("{property:?} expects a {kind}"))?;
                        store.set_scalar(target, property, v)?;
                    }
                }
                PropertyKind::Reference(_) => {
                    let referent = match value {
                        serde_json::Value::Null => None,
                        other => Some(resolve_entity(store, names, string_of(other, property)?)?),
                    };
                    store.set_reference(target, property, referent)?;
                }
                _ => bail!("{property:?} is a container property; use push, insert, or remove"),
            }
        }
        ScriptOp::Clear { entity, property } => {
            let target = resolve_entity(store, names, entity)?;
            match property_kind(store, target, property)?.shape() {
                Shape::Single => store.clear(target, property)?,
                Shape::List => store.update(|tx| tx.list(target, property)?.clear())?,
                Shape::Set => store.update(|tx| tx.set(target, property)?.clear())?,
                Shape::Map => store.update(|tx| tx.map(target, property)?.clear())?,
            }
        }
        ScriptOp::Push {
            entity,
            property,
            value,
        } => {
            let target = resolve_entity(store, names, entity)?;
            let PropertyKind::List(elem) = property_kind(store, target, property)? else {
                bail!("{property:?} is not a list property");
            };
            let item = element_value(store, names, &elem, value, property)?;
            store.update(|tx| tx.list(target, property)?.push(item))?;
        }
        ScriptOp::Insert {
            entity,
            property,
            key,
            value,
        } => {
            let target = resolve_entity(store, names, entity)?;
            match property_kind(store, target, property)? {
                PropertyKind::Set(elem) => {
                    if key.is_some() {
                        bail!("set insert takes no key");
                    }
                    let item = element_value(store, names, &elem, value, property)?;
                    store.update(|tx| tx.set(target, property)?.insert(item).map(|_| ()))?;
                }
                PropertyKind::Map {
                    key: key_kind,
                    value: elem,
                } => {
                    let raw = key
                        .as_ref()
                        .ok_or_else(|| anyhow!("map insert needs a key"))?;
                    let map_key = map_key_value(names, key_kind, raw, property)?;
                    let item = element_value(store, names, &elem, value, property)?;
                    store.update(|tx| tx.map(target, property)?.insert(map_key, item))?;
                }
                _ => bail!("{property:?} is not a set or map property"),
            }
        }
        ScriptOp::Remove {
            entity,
            property,
            index,
            key,
            value,
        } => {
            let target = resolve_entity(store, names, entity)?;
            match property_kind(store, target, property)? {
                PropertyKind::List(_) => {
                    let index = index.ok_or_else(|| anyhow!("list remove needs an index"))?;
                    store.update(|tx| tx.list(target, property)?.remove(index).map(|_| ()))?;
                }
                PropertyKind::Set(elem) => {
                    let raw = value
                        .as_ref()
                        .ok_or_else(|| anyhow!("set remove needs a value"))?;
                    let item = element_value(store, names, &elem, raw, property)?;
                    store.update(|tx| tx.set(target, property)?.remove(&item).map(|_| ()))?;
                }
                PropertyKind::Map { key: key_kind, .. } => {
                    let raw = key
                        .as_ref()
                        .ok_or_else(|| anyhow!("map remove needs a key"))?;
                    let map_key = map_key_value(names, key_kind, raw, property)?;
                    store.update(|tx| tx.map(target, property)?.remove(&map_key).map(|_| ()))?;
                }
                _ => bail!("{property:?} is not a container property"),
            }
        }
        ScriptOp::Delete { entity } => {
            let target = resolve_entity(store, names, entity)?;
            store.delete(target)?;
        }
        ScriptOp::Undo => {
            store.undo()?;
        }
        ScriptOp::Redo => {
            store.redo()?;
        }
    }
    Ok(())
}

/// A bound name wins over an id string; anything else must parse as the id
/// of a live entity.
fn resolve_entity(
    store: &Store,
    names: &BTreeMap<String, Entity>,
    text: &str,
) -> anyhow::Result<Entity> {
    if let Some(handle) = names.get(text) {
        return Ok(*handle);
    }
    let id = EntityId::parse(text)
        .map_err(|_| anyhow!("{text:?} is neither a bound name nor an entity id"))?;
    Ok(store.entity(id)?)
}

fn property_kind(store: &Store, target: Entity, property: &str) -> anyhow::Result<PropertyKind> {
    let schema = store.schema();
    let type_name = store.type_of(target)?;
    let type_idx = schema
        .type_idx(type_name)
        .ok_or_else(|| anyhow!("unknown type {type_name:?}"))?;
    let ty = schema.type_at(type_idx);
    let prop_idx = ty
        .prop_idx(property)
        .ok_or_else(|| anyhow!("{type_name} has no property {property:?}"))?;
    Ok(ty.prop(prop_idx).kind.clone())
}

fn scalar_value(kind: ScalarKind, raw: &serde_json::Value) -> Option<Value> {
    match kind {
        ScalarKind::Bool => raw.as_bool().map(Value::from),
        ScalarKind::Int => raw.as_i64().map(Value::from),
        ScalarKind::Float => raw.as_f64().map(Value::from),
        ScalarKind::Str => raw.as_str().map(Value::from),
    }
}

fn element_value(
    store: &Store,
    names: &BTreeMap<String, Entity>,
    elem: &ElementKind,
    raw: &serde_json::Value,
    property: &str,
) -> anyhow::Result<Value> {
    match elem {
        ElementKind::Scalar(kind) => scalar_value(*kind, raw)
            .ok_or_else(|| anyhow!("{property:?} expects {kind} elements")),
        ElementKind::Reference(_) => {
            let handle = resolve_entity(store, names, string_of(raw, property)?)?;
            Ok(Value::Ref(handle.id()))
        }
    }
}

/// Map keys are labels, not edges; a bound name contributes its id without
/// any liveness requirement.
fn map_key_value(
    names: &BTreeMap<String, Entity>,
    kind: MapKeyKind,
    raw: &serde_json::Value,
    property: &str,
) -> anyhow::Result<MapKey> {
    let text = string_of(raw, property)?;
    match kind {
        MapKeyKind::Str => Ok(MapKey::Str(text.to_string())),
        MapKeyKind::Id => {
            if let Some(handle) = names.get(text) {
                return Ok(MapKey::Id(handle.id()));
            }
            let id = EntityId::parse(text)
                .map_err(|_| anyhow!("{property:?} keys must be bound names or entity ids"))?;
            Ok(MapKey::Id(id))
        }
    }
}

fn string_of<'a>(raw: &'a serde_json::Value, property: &str) -> anyhow::Result<&'a str> {
    raw.as_str()
        .ok_or_else(|| anyhow!("{property:?} expects an entity name or id string"))
}

/// Rewrite a create initializer so bound names in reference positions become
/// entity id strings the store's JSON interpreter understands. Unknown
/// fields and shape mismatches pass through untouched; the store rejects
/// them with its own errors.
fn resolve_init(
    store: &Store,
    names: &BTreeMap<String, Entity>,
    type_name: &str,
    raw: &serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let schema = store.schema();
    let Some(type_idx) = schema.type_idx(type_name) else {
        return Ok(raw.clone());
    };
    let ty = schema.type_at(type_idx);
    let serde_json::Value::Object(fields) = raw else {
        bail!("create values must be a JSON object");
    };
    let mut out = serde_json::Map::with_capacity(fields.len());
    for (field, value) in fields {
        let Some(prop_idx) = ty.prop_idx(field) else {
            out.insert(field.clone(), value.clone());
            continue;
        };
        if value.is_null() {
            out.insert(field.clone(), value.clone());
            continue;
        }
        let resolved = match &ty.prop(prop_idx).kind {
            PropertyKind::Scalar(_) => value.clone(),
            PropertyKind::Reference(spec) => resolve_ref_value(store, names, spec, value)?,
            PropertyKind::List(elem) | PropertyKind::Set(elem) => {
                resolve_elements(store, names, elem, value)?
            }
            PropertyKind::Map { key, value: elem } => {
                let serde_json::Value::Object(entries) = value else {
                    out.insert(field.clone(), value.clone());
                    continue;
                };
                let mut object = serde_json::Map::with_capacity(entries.len());
                for (k, item) in entries {
                    let rendered = match key {
                        MapKeyKind::Str => k.clone(),
                        MapKeyKind::Id => match names.get(k) {
                            Some(handle) => handle.id().to_string(),
                            None => k.clone(),
                        },
                    };
                    object.insert(rendered, resolve_element(store, names, elem, item)?);
                }
                serde_json::Value::Object(object)
            }
        };
        out.insert(field.clone(), resolved);
    }
    Ok(serde_json::Value::Object(out))
}

fn resolve_elements(
    store: &Store,
    names: &BTreeMap<String, Entity>,
    elem: &ElementKind,
    raw: &serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let serde_json::Value::Array(items) = raw else {
        return Ok(raw.clone());
    };
    let resolved = items
        .iter()
        .map(|item| resolve_element(store, names, elem, item))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(serde_json::Value::Array(resolved))
}

fn resolve_element(
    store: &Store,
    names: &BTreeMap<String, Entity>,
    elem: &ElementKind,
    raw: &serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    match elem {
        ElementKind::Scalar(_) => Ok(raw.clone()),
        ElementKind::Reference(spec) => resolve_ref_value(store, names, spec, raw),
    }
}

fn resolve_ref_value(
    store: &Store,
    names: &BTreeMap<String, Entity>,
    spec: &RefSpec,
    raw: &serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    match raw {
        serde_json::Value::String(text) => match names.get(text.as_str()) {
            Some(handle) => Ok(serde_json::Value::String(handle.id().to_string())),
            None => Ok(raw.clone()),
        },
        // A nested object creates an entity of the declared target inline.
        serde_json::Value::Object(_) => resolve_init(store, names, &spec.target, raw),
        _ => Ok(raw.clone()),
    }
}
