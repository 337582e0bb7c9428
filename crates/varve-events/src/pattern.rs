use varve_types::{ChangeRecord, Operation};

/// Filter for subscribing to a subset of change records.
///
/// Every `None` field is a wildcard. A pattern with all fields `None`
/// matches every record; one with all fields set matches exactly one
/// (operation, type, property) combination. Records without a property
/// (whole-entity create and delete) are matched only by patterns whose
/// `property` field is a wildcard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub op: Option<Operation>,
    pub type_name: Option<String>,
    pub property: Option<String>,
}

impl Pattern {
    /// The match-everything pattern.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to one operation.
    pub fn operation(mut self, op: Operation) -> Self {
        self.op = Some(op);
        self
    }

    /// Restrict to one entity type.
    pub fn of_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Restrict to one property.
    pub fn on_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Returns `true` if the given record matches this pattern.
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        if let Some(op) = self.op {
            if op != record.op {
                return false;
            }
        }
        if let Some(type_name) = &self.type_name {
            if *type_name != record.type_name {
                return false;
            }
        }
        if let Some(property) = &self.property {
            if record.property.as_deref() != Some(property.as_str()) {
                return false;
            }
        }
        true
    }

    pub(crate) fn key(&self) -> PatternKey {
        PatternKey {
            op: self.op,
            type_name: self.type_name.clone(),
            property: self.property.clone(),
        }
    }
}

/// Registry key: the pattern's three fields, `None` meaning wildcard.
///
/// Dispatch never parses string patterns; it enumerates the bounded set of
/// wildcard combinations of a record's own key and looks each one up
/// directly.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PatternKey {
    pub op: Option<Operation>,
    pub type_name: Option<String>,
    pub property: Option<String>,
}

/// Every registry key that could match `record`, specific before wildcard,
/// operation varying outermost. At most eight keys; four when the record
/// has no property.
pub(crate) fn candidate_keys(record: &ChangeRecord) -> Vec<PatternKey> {
    let mut keys = Vec::with_capacity(8);
    for op in [Some(record.op), None] {
        for type_name in [Some(record.type_name.clone()), None] {
            match &record.property {
                Some(property) => {
                    for property in [Some(property.clone()), None] {
                        keys.push(PatternKey {
                            op,
                            type_name: type_name.clone(),
                            property,
                        });
                    }
                }
                None => keys.push(PatternKey {
                    op,
                    type_name: type_name.clone(),
                    property: None,
                }),
            }
        }
    }
    keys
}
