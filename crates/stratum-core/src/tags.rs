//! Tag records and tag-filter specifications.
//!
//! A tag filter is made of independent *groups*: each tag id, each tag type and
//! each `(type, name)` pair forms one group. Groups resolve to entity sets that
//! are combined by union ([`TagMatchMode::Any`]) or intersection
//! ([`TagMatchMode::All`]).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults::{DEFAULT_TAG_TYPE, TAG_NAME_MAX_LENGTH};
use crate::error::{Error, Result};

/// A tenant-scoped tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub tag_type: String,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn to_ref(&self) -> TagRef {
        TagRef {
            id: self.id,
            name: self.name.clone(),
            tag_type: self.tag_type.clone(),
        }
    }
}

/// Display form of a tag attached to a query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagRef {
    pub id: Uuid,
    pub name: String,
    pub tag_type: String,
}

/// An exact `(type, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeName {
    pub tag_type: String,
    pub name: String,
}

impl TypeName {
    pub fn new(tag_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tag_type: tag_type.into(),
            name: name.into(),
        }
    }
}

/// Criteria for looking up tags in a tenant. Empty fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct TagLookup {
    pub ids: Vec<Uuid>,
    pub tag_type: Option<String>,
    pub type_names: Vec<TypeName>,
    /// Case-insensitive substring of the tag name.
    pub name_contains: Option<String>,
}

impl TagLookup {
    pub fn by_ids(ids: Vec<Uuid>) -> Self {
        Self {
            ids,
            ..Default::default()
        }
    }

    pub fn by_type(tag_type: impl Into<String>) -> Self {
        Self {
            tag_type: Some(tag_type.into()),
            ..Default::default()
        }
    }

    pub fn by_type_name(pair: TypeName) -> Self {
        Self {
            type_names: vec![pair],
            ..Default::default()
        }
    }

    /// Whether a tag satisfies every populated criterion.
    pub fn matches(&self, tag: &Tag) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&tag.id) {
            return false;
        }
        if let Some(ref t) = self.tag_type {
            if &tag.tag_type != t {
                return false;
            }
        }
        if !self.type_names.is_empty()
            && !self
                .type_names
                .iter()
                .any(|p| p.tag_type == tag.tag_type && p.name == tag.name)
        {
            return false;
        }
        if let Some(ref needle) = self.name_contains {
            if !tag.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// How filter groups are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatchMode {
    /// Union: an entity matches if it matches any group.
    #[default]
    Any,
    /// Intersection: an entity must match every group independently.
    All,
}

impl std::fmt::Display for TagMatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::All => write!(f, "all"),
        }
    }
}

impl std::str::FromStr for TagMatchMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "all" => Ok(Self::All),
            other => Err(Error::Config(format!("unknown tag match mode: {}", other))),
        }
    }
}

/// One criterion of a tag query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilterGroup {
    Id(Uuid),
    Type(String),
    TypeName(TypeName),
}

impl TagFilterGroup {
    /// The tag lookup that resolves this group.
    pub fn lookup(&self) -> TagLookup {
        match self {
            Self::Id(id) => TagLookup::by_ids(vec![*id]),
            Self::Type(t) => TagLookup::by_type(t.clone()),
            Self::TypeName(pair) => TagLookup::by_type_name(pair.clone()),
        }
    }
}

/// A multi-criterion tag query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagFilterSpec {
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
    #[serde(default)]
    pub tag_types: Vec<String>,
    #[serde(default)]
    pub type_names: Vec<TypeName>,
    #[serde(default)]
    pub mode: TagMatchMode,
}

impl TagFilterSpec {
    pub fn new(mode: TagMatchMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_tag_id(mut self, id: Uuid) -> Self {
        self.tag_ids.push(id);
        self
    }

    pub fn with_tag_type(mut self, tag_type: impl Into<String>) -> Self {
        self.tag_types.push(tag_type.into());
        self
    }

    pub fn with_type_name(mut self, tag_type: impl Into<String>, name: impl Into<String>) -> Self {
        self.type_names.push(TypeName::new(tag_type, name));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tag_ids.is_empty() && self.tag_types.is_empty() && self.type_names.is_empty()
    }

    /// Flatten into independent groups: ids, then types, then pairs.
    pub fn groups(&self) -> Vec<TagFilterGroup> {
        self.tag_ids
            .iter()
            .map(|id| TagFilterGroup::Id(*id))
            .chain(self.tag_types.iter().cloned().map(TagFilterGroup::Type))
            .chain(self.type_names.iter().cloned().map(TagFilterGroup::TypeName))
            .collect()
    }
}

/// Trim and validate a tag name.
pub fn normalize_tag_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("tag name must not be empty".to_string()));
    }
    if trimmed.chars().count() > TAG_NAME_MAX_LENGTH {
        return Err(Error::InvalidInput(format!(
            "tag name exceeds {} characters",
            TAG_NAME_MAX_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}

/// Trim a tag type, substituting the default type when blank.
pub fn normalize_tag_type(tag_type: &str) -> String {
    let trimmed = tag_type.trim();
    if trimmed.is_empty() {
        DEFAULT_TAG_TYPE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Group tag refs by type, keeping each group in first-seen order.
pub fn group_tags_by_type(tags: &[TagRef]) -> BTreeMap<String, Vec<TagRef>> {
    let mut grouped: BTreeMap<String, Vec<TagRef>> = BTreeMap::new();
    for tag in tags {
        grouped
            .entry(tag.tag_type.clone())
            .or_default()
            .push(tag.clone());
    }
    grouped
}
