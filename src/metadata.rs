//! Metadata lookup contracts consumed by the generator.
//!
//! Attribute scanning and mapping configuration live in the front-end; the
//! generator only consumes these lookups. The field contract is converter
//! aware: when the stored and declared representations of a field differ, the
//! generator inserts exactly one conversion call around the field access.

use serde::{Deserialize, Serialize};

use crate::query_model::MemberRef;

/// Maps a declared entity kind to its collection / data-set name.
pub trait CollectionNameResolver {
    fn collection_name(&self, entity: &str) -> String;
}

/// Maps a declared member to its serialized field name and representations.
pub trait FieldNameResolver {
    fn resolve(&self, member: &MemberRef) -> FieldMapping;
}

/// How a value is represented on one side of the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueRepr {
    Plain,
    /// Date-time as milliseconds since the Unix epoch.
    UnixMillis,
    /// Date-time as ISO-8601 calendar text.
    Iso8601,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field: String,
    /// Representation of the serialized field in the document.
    pub stored: ValueRepr,
    /// Representation the query pipeline computes with.
    pub declared: ValueRepr,
}

impl FieldMapping {
    pub fn plain(field: impl Into<String>) -> Self {
        FieldMapping {
            field: field.into(),
            stored: ValueRepr::Plain,
            declared: ValueRepr::Plain,
        }
    }

    pub fn with_reprs(field: impl Into<String>, stored: ValueRepr, declared: ValueRepr) -> Self {
        FieldMapping {
            field: field.into(),
            stored,
            declared,
        }
    }
}

/// Pass-through resolver: the entity kind is the collection name and the
/// member name is the field name. Useful when no mapping metadata exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl CollectionNameResolver for IdentityResolver {
    fn collection_name(&self, entity: &str) -> String {
        entity.to_string()
    }
}

impl FieldNameResolver for IdentityResolver {
    fn resolve(&self, member: &MemberRef) -> FieldMapping {
        FieldMapping::plain(member.name.clone())
    }
}
