//! Type metadata: the descriptors a host application supplies and the
//! compiled form the store runs on.
//!
//! Descriptors are plain data. [`Schema::compile`] turns a set of them into
//! per-type dispatch tables: property names resolved to slot indices, every
//! reference target checked against the type universe, and every declared
//! inverse resolved to a concrete [`InverseLink`]. A malformed descriptor set
//! is rejected here, before any store is built on top of it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Index of a type inside a compiled [`Schema`].
pub type TypeIdx = usize;

/// Index of a property inside its type's slot table.
pub type PropIdx = usize;

/// Runtime kind of a scalar value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    Str,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Str => "string",
        };
        write!(f, "{name}")
    }
}

/// Declared key kind of a map-valued property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapKeyKind {
    Str,
    Id,
}

/// The container shape of a property.
///
/// Single covers both scalar and single-reference properties; the other three
/// are the observable containers. Inverse declarations name the counterpart
/// property's shape with the same enum, which is what lets compilation check
/// that both ends of a relationship agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Shape {
    Single,
    List,
    Set,
    Map,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Single => "single",
            Shape::List => "list",
            Shape::Set => "set",
            Shape::Map => "map",
        };
        write!(f, "{name}")
    }
}

/// Declared inverse of a reference-bearing property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverseSpec {
    /// Property name on the target type.
    pub property: String,
    /// Shape that property is expected to have.
    pub kind: Shape,
}

/// Reference declaration: which type the reference points at, and the
/// optional inverse property maintained on that type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefSpec {
    pub target: String,
    pub inverse: Option<InverseSpec>,
}

impl RefSpec {
    /// A reference to `target` with no inverse.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            inverse: None,
        }
    }

    /// Declare the inverse property on the target type.
    pub fn with_inverse(mut self, property: impl Into<String>, kind: Shape) -> Self {
        self.inverse = Some(InverseSpec {
            property: property.into(),
            kind,
        });
        self
    }
}

/// Element kind of a container property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Scalar(ScalarKind),
    Reference(RefSpec),
}

/// Declared kind of a property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Scalar(ScalarKind),
    Reference(RefSpec),
    List(ElementKind),
    Set(ElementKind),
    Map { key: MapKeyKind, value: ElementKind },
}

impl PropertyKind {
    /// The container shape of this property.
    pub fn shape(&self) -> Shape {
        match self {
            PropertyKind::Scalar(_) | PropertyKind::Reference(_) => Shape::Single,
            PropertyKind::List(_) => Shape::List,
            PropertyKind::Set(_) => Shape::Set,
            PropertyKind::Map { .. } => Shape::Map,
        }
    }

    /// The reference declaration, if this property holds references at all.
    pub fn ref_spec(&self) -> Option<&RefSpec> {
        match self {
            PropertyKind::Reference(spec) => Some(spec),
            PropertyKind::List(ElementKind::Reference(spec))
            | PropertyKind::Set(ElementKind::Reference(spec))
            | PropertyKind::Map {
                value: ElementKind::Reference(spec),
                ..
            } => Some(spec),
            _ => None,
        }
    }

    /// The element kind, for container properties.
    pub fn element(&self) -> Option<&ElementKind> {
        match self {
            PropertyKind::List(elem) | PropertyKind::Set(elem) => Some(elem),
            PropertyKind::Map { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The declared map key kind, for map properties.
    pub fn map_key_kind(&self) -> Option<MapKeyKind> {
        match self {
            PropertyKind::Map { key, .. } => Some(*key),
            _ => None,
        }
    }
}

/// One property as declared by the host application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertyDescriptor {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Scalar(kind),
        }
    }

    pub fn reference(name: impl Into<String>, spec: RefSpec) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Reference(spec),
        }
    }

    pub fn list(name: impl Into<String>, element: ElementKind) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::List(element),
        }
    }

    pub fn set(name: impl Into<String>, element: ElementKind) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Set(element),
        }
    }

    pub fn map(name: impl Into<String>, key: MapKeyKind, value: ElementKind) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Map { key, value },
        }
    }
}

/// One entity type as declared by the host application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn with(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }
}

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

/// A fully resolved inverse relationship, attached to the owning property.
///
/// `owner_shape` is the shape of the property this link hangs off;
/// `inverse_shape` is the shape of the counterpart property on the target
/// type. The pair selects one of the sixteen inverse-maintenance pairings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InverseLink {
    pub target_type: TypeIdx,
    pub target_prop: PropIdx,
    pub owner_shape: Shape,
    pub inverse_shape: Shape,
    /// Key kind of the counterpart property when it is a map.
    pub key_kind: Option<MapKeyKind>,
}

/// One property after compilation.
#[derive(Clone, Debug)]
pub struct PropSchema {
    pub name: String,
    pub kind: PropertyKind,
    /// Resolved inverse, if the descriptor declared one.
    pub inverse: Option<InverseLink>,
}

impl PropSchema {
    pub fn shape(&self) -> Shape {
        self.kind.shape()
    }

    pub fn ref_spec(&self) -> Option<&RefSpec> {
        self.kind.ref_spec()
    }

    /// Returns `true` if the property holds entity references.
    pub fn is_ref_bearing(&self) -> bool {
        self.kind.ref_spec().is_some()
    }
}

/// One type after compilation: properties resolved to slot indices.
#[derive(Clone, Debug)]
pub struct TypeSchema {
    pub name: String,
    props: Vec<PropSchema>,
    by_name: BTreeMap<String, PropIdx>,
    ref_props: Vec<PropIdx>,
}

impl TypeSchema {
    /// Look up a property's slot index by name.
    pub fn prop_idx(&self, name: &str) -> Option<PropIdx> {
        self.by_name.get(name).copied()
    }

    pub fn prop(&self, idx: PropIdx) -> &PropSchema {
        &self.props[idx]
    }

    pub fn props(&self) -> impl Iterator<Item = (PropIdx, &PropSchema)> {
        self.props.iter().enumerate()
    }

    pub fn prop_count(&self) -> usize {
        self.props.len()
    }

    /// Slot indices of every reference-bearing property, cached so delete
    /// disconnection and graph walks skip scalar slots.
    pub fn ref_props(&self) -> &[PropIdx] {
        &self.ref_props
    }
}

/// Compiled type universe. Built once, immutable afterwards.
#[derive(Clone, Debug)]
pub struct Schema {
    types: Vec<TypeSchema>,
    by_name: BTreeMap<String, TypeIdx>,
}

impl Schema {
    /// Compile a descriptor set into dispatch tables.
    ///
    /// Rejects duplicate type or property names, references to unknown
    /// types, inverses naming unknown properties, inverse shape mismatches,
    /// and inverse pairs whose two declarations do not point at each other.
    pub fn compile(descriptors: Vec<TypeDescriptor>) -> Result<Self, SchemaError> {
        let mut by_name = BTreeMap::new();
        for (idx, desc) in descriptors.iter().enumerate() {
            if by_name.insert(desc.name.clone(), idx).is_some() {
                return Err(SchemaError::DuplicateType(desc.name.clone()));
            }
        }

        let mut types = Vec::with_capacity(descriptors.len());
        for desc in &descriptors {
            let mut prop_names = BTreeMap::new();
            for (idx, prop) in desc.properties.iter().enumerate() {
                if prop_names.insert(prop.name.clone(), idx).is_some() {
                    return Err(SchemaError::DuplicateProperty {
                        type_name: desc.name.clone(),
                        property: prop.name.clone(),
                    });
                }
            }
            let ref_props = desc
                .properties
                .iter()
                .enumerate()
                .filter(|(_, p)| p.kind.ref_spec().is_some())
                .map(|(i, _)| i)
                .collect();
            types.push(TypeSchema {
                name: desc.name.clone(),
                props: desc
                    .properties
                    .iter()
                    .map(|p| PropSchema {
                        name: p.name.clone(),
                        kind: p.kind.clone(),
                        inverse: None,
                    })
                    .collect(),
                by_name: prop_names,
                ref_props,
            });
        }

        // Resolve reference targets and inverse links against the full table.
        let mut links: Vec<(TypeIdx, PropIdx, InverseLink)> = Vec::new();
        for (type_idx, desc) in descriptors.iter().enumerate() {
            for (prop_idx, prop) in desc.properties.iter().enumerate() {
                let Some(spec) = prop.kind.ref_spec() else {
                    continue;
                };
                let Some(&target_type) = by_name.get(&spec.target) else {
                    return Err(SchemaError::UnknownTargetType {
                        type_name: desc.name.clone(),
                        property: prop.name.clone(),
                        target: spec.target.clone(),
                    });
                };
                let Some(inverse) = &spec.inverse else {
                    continue;
                };
                let link = resolve_inverse(
                    &descriptors,
                    type_idx,
                    prop_idx,
                    target_type,
                    inverse,
                )?;
                links.push((type_idx, prop_idx, link));
            }
        }
        for (type_idx, prop_idx, link) in links {
            types[type_idx].props[prop_idx].inverse = Some(link);
        }

        Ok(Self { types, by_name })
    }

    /// Look up a type's index by name.
    pub fn type_idx(&self, name: &str) -> Option<TypeIdx> {
        self.by_name.get(name).copied()
    }

    pub fn type_at(&self, idx: TypeIdx) -> &TypeSchema {
        &self.types[idx]
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn types(&self) -> impl Iterator<Item = (TypeIdx, &TypeSchema)> {
        self.types.iter().enumerate()
    }
}

/// Check one declared inverse against the counterpart's declaration.
fn resolve_inverse(
    descriptors: &[TypeDescriptor],
    owner_type: TypeIdx,
    owner_prop: PropIdx,
    target_type: TypeIdx,
    declared: &InverseSpec,
) -> Result<InverseLink, SchemaError> {
    let owner = &descriptors[owner_type];
    let target = &descriptors[target_type];
    let owner_name = &owner.properties[owner_prop].name;

    let Some(target_prop) = target
        .properties
        .iter()
        .position(|p| p.name == declared.property)
    else {
        return Err(SchemaError::UnknownInverseProperty {
            type_name: owner.name.clone(),
            property: owner_name.clone(),
            target: target.name.clone(),
            inverse: declared.property.clone(),
        });
    };

    let counterpart = &target.properties[target_prop];
    let actual = counterpart.kind.shape();
    if actual != declared.kind {
        return Err(SchemaError::InverseKindMismatch {
            type_name: owner.name.clone(),
            property: owner_name.clone(),
            target: target.name.clone(),
            inverse: declared.property.clone(),
            declared: declared.kind,
            actual,
        });
    }

    // The counterpart must reference the owner type and declare this
    // property as its own inverse, with the owner's shape.
    let symmetric = counterpart.kind.ref_spec().is_some_and(|spec| {
        spec.target == owner.name
            && spec.inverse.as_ref().is_some_and(|inv| {
                inv.property == *owner_name
                    && inv.kind == owner.properties[owner_prop].kind.shape()
            })
    });
    if !symmetric {
        return Err(SchemaError::AsymmetricInverse {
            type_name: owner.name.clone(),
            property: owner_name.clone(),
            target: target.name.clone(),
            inverse: declared.property.clone(),
        });
    }

    Ok(InverseLink {
        target_type,
        target_prop,
        owner_shape: owner.properties[owner_prop].kind.shape(),
        inverse_shape: actual,
        key_kind: counterpart.kind.map_key_kind(),
    })
}
