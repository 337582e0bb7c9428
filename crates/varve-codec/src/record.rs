use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use varve_types::EntityId;

/// One entity as it crosses the serialization boundary: identity, type name,
/// and every set property rendered as plain JSON.
///
/// References are uuid strings, lists are arrays, sets are sorted arrays,
/// and maps are objects whose keys are the map key's string form (uuid
/// strings for id-keyed maps). Unset and empty properties are omitted, so a
/// freshly created entity exports with an empty `values` object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl ExportRecord {
    pub fn new(id: EntityId, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            values: BTreeMap::new(),
        }
    }
}
