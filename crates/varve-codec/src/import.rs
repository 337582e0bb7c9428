//! Schema-aware graph import.
//!
//! Importing is planned entirely outside the transaction: every record is
//! checked against the schema and converted to typed values first, so the
//! transaction itself can only fail on store-level conditions (and rolls
//! back completely when it does).

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use varve_store::{Entity, Store, StoreResult, Tx};
use varve_types::{
    ElementKind, EntityId, MapKey, MapKeyKind, PropSchema, PropertyKind, ScalarKind, Value,
};

use crate::error::{CodecError, CodecResult};
use crate::record::ExportRecord;

/// Counts from a completed import.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Entities created.
    pub entities: usize,
    /// Properties written.
    pub properties: usize,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entities, {} properties",
            self.entities, self.properties
        )
    }
}

/// Parse export records from JSON text.
pub fn from_json_str(json: &str) -> CodecResult<Vec<ExportRecord>> {
    Ok(serde_json::from_str(json)?)
}

/// Import records into `store` in one transaction.
///
/// Pass one creates every entity under its recorded id; pass two writes the
/// values. Forward references and cycles resolve because every id is live
/// after pass one, and inverse maintenance runs normally, so the imported
/// graph comes out bidirectionally consistent. Any failure rolls the whole
/// transaction back and the store is left exactly as it was.
pub fn import(store: &mut Store, records: &[ExportRecord]) -> CodecResult<ImportReport> {
    let plan = plan_import(store, records)?;

    let mut report = ImportReport::default();
    store.update(|tx| {
        let mut handles = Vec::with_capacity(plan.len());
        for planned in &plan {
            handles.push(tx.create_with_id(planned.id, &planned.type_name)?);
        }
        for (planned, handle) in plan.iter().zip(&handles) {
            for (property, value) in &planned.writes {
                apply_write(tx, *handle, property, value)?;
                report.properties += 1;
            }
        }
        report.entities = handles.len();
        Ok(())
    })?;

    debug!(
        entities = report.entities,
        properties = report.properties,
        "records imported"
    );
    Ok(report)
}

struct PlannedEntity {
    id: EntityId,
    type_name: String,
    writes: Vec<(String, PlannedValue)>,
}

enum PlannedValue {
    Scalar(Value),
    Reference(EntityId),
    List { items: Vec<Value>, guard: bool },
    Set(Vec<Value>),
    Map(Vec<(MapKey, Value)>),
}

/// Validate every record against the schema and convert its values.
fn plan_import(store: &Store, records: &[ExportRecord]) -> CodecResult<Vec<PlannedEntity>> {
    let mut seen = BTreeSet::new();
    let mut plan = Vec::with_capacity(records.len());

    for record in records {
        if !seen.insert(record.id) || store.contains(record.id) {
            return Err(CodecError::DuplicateEntity(record.id));
        }
        let type_idx = store
            .schema()
            .type_idx(&record.type_name)
            .ok_or_else(|| CodecError::UnknownType(record.type_name.clone()))?;
        let type_schema = store.schema().type_at(type_idx);

        let mut writes = Vec::new();
        for (property, json) in &record.values {
            let prop_idx =
                type_schema
                    .prop_idx(property)
                    .ok_or_else(|| CodecError::UnknownProperty {
                        type_name: record.type_name.clone(),
                        property: property.clone(),
                    })?;
            if let Some(planned) = plan_value(record.id, type_schema.prop(prop_idx), json)? {
                writes.push((property.clone(), planned));
            }
        }
        plan.push(PlannedEntity {
            id: record.id,
            type_name: record.type_name.clone(),
            writes,
        });
    }

    Ok(plan)
}

fn plan_value(
    id: EntityId,
    prop: &PropSchema,
    json: &serde_json::Value,
) -> CodecResult<Option<PlannedValue>> {
    if json.is_null() {
        // Null carries no value (a non-finite float export, say); leave unset.
        return Ok(None);
    }
    let planned = match &prop.kind {
        PropertyKind::Scalar(kind) => {
            PlannedValue::Scalar(scalar_from_json(id, prop, *kind, json)?)
        }
        PropertyKind::Reference(_) => PlannedValue::Reference(id_from_json(id, prop, json)?),
        PropertyKind::List(element) => PlannedValue::List {
            items: elements_from_json(id, prop, element, json)?,
            guard: prop.inverse.is_some(),
        },
        PropertyKind::Set(element) => {
            PlannedValue::Set(elements_from_json(id, prop, element, json)?)
        }
        PropertyKind::Map { key, value } => {
            let serde_json::Value::Object(object) = json else {
                return Err(invalid(id, prop, "expected an object"));
            };
            let mut entries = Vec::with_capacity(object.len());
            for (raw_key, raw_value) in object {
                if raw_value.is_null() {
                    continue;
                }
                let map_key = match key {
                    MapKeyKind::Str => MapKey::Str(raw_key.clone()),
                    MapKeyKind::Id => MapKey::Id(parse_id(id, prop, raw_key)?),
                };
                entries.push((map_key, element_from_json(id, prop, value, raw_value)?));
            }
            PlannedValue::Map(entries)
        }
    };
    Ok(Some(planned))
}

/// Apply one planned write. Conversion already happened, so only store
/// errors can surface here.
fn apply_write(
    tx: &mut Tx<'_>,
    target: Entity,
    property: &str,
    value: &PlannedValue,
) -> StoreResult<()> {
    match value {
        PlannedValue::Scalar(v) => tx.set_scalar(target, property, v.clone())?,
        PlannedValue::Reference(id) => {
            let counterpart = tx.entity(*id)?;
            tx.set_reference(target, property, Some(counterpart))?;
        }
        PlannedValue::List { items, guard } => {
            let mut list = tx.list(target, property)?;
            // Earlier records may have wired part of this list through the
            // inverse side, one occurrence per counterpart in record order.
            // The recorded sequence wins, duplicate occurrences included:
            // rebuild unless the wiring already matches it exactly.
            let wired = if *guard { list.values()? } else { Vec::new() };
            if !items.is_empty() && wired != *items {
                if !wired.is_empty() {
                    list.clear()?;
                }
                for item in items {
                    list.push(item.clone())?;
                }
            }
        }
        PlannedValue::Set(items) => {
            let mut set = tx.set(target, property)?;
            for item in items {
                set.insert(item.clone())?;
            }
        }
        PlannedValue::Map(entries) => {
            let mut map = tx.map(target, property)?;
            for (key, val) in entries {
                map.insert(key.clone(), val.clone())?;
            }
        }
    }
    Ok(())
}

fn elements_from_json(
    id: EntityId,
    prop: &PropSchema,
    element: &ElementKind,
    json: &serde_json::Value,
) -> CodecResult<Vec<Value>> {
    let serde_json::Value::Array(items) = json else {
        return Err(invalid(id, prop, "expected an array"));
    };
    items
        .iter()
        .filter(|item| !item.is_null())
        .map(|item| element_from_json(id, prop, element, item))
        .collect()
}

fn element_from_json(
    id: EntityId,
    prop: &PropSchema,
    element: &ElementKind,
    json: &serde_json::Value,
) -> CodecResult<Value> {
    match element {
        ElementKind::Scalar(kind) => scalar_from_json(id, prop, *kind, json),
        ElementKind::Reference(_) => Ok(Value::Ref(id_from_json(id, prop, json)?)),
    }
}

fn scalar_from_json(
    id: EntityId,
    prop: &PropSchema,
    kind: ScalarKind,
    json: &serde_json::Value,
) -> CodecResult<Value> {
    let value = match kind {
        ScalarKind::Bool => json.as_bool().map(Value::Bool),
        ScalarKind::Int => json.as_i64().map(Value::Int),
        ScalarKind::Float => json.as_f64().map(Value::Float),
        ScalarKind::Str => json.as_str().map(Value::from),
    };
    value.ok_or_else(|| invalid(id, prop, format!("expected {kind}")))
}

fn id_from_json(
    id: EntityId,
    prop: &PropSchema,
    json: &serde_json::Value,
) -> CodecResult<EntityId> {
    let Some(s) = json.as_str() else {
        return Err(invalid(id, prop, "expected a uuid string"));
    };
    parse_id(id, prop, s)
}

fn parse_id(id: EntityId, prop: &PropSchema, s: &str) -> CodecResult<EntityId> {
    EntityId::parse(s).map_err(|_| invalid(id, prop, format!("malformed uuid {s:?}")))
}

fn invalid(id: EntityId, prop: &PropSchema, reason: impl fmt::Display) -> CodecError {
    CodecError::InvalidRecord {
        id,
        reason: format!("{}: {reason}", prop.name),
    }
}
