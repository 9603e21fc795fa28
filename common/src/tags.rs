//! Envelope/bundle tags.
//!
//! Per spec.md §9 design note "Dynamic tag bag on items": tags are represented as a
//! plain slice of `{name, value}` pairs exactly as they appear in an envelope, and
//! well-known tags (content type, bundle format/version, app name) are decoded into
//! named fields once at parse time rather than re-interpreted ad hoc downstream.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// An ordered collection of tags as carried in an envelope or bundle transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagList(pub Vec<Tag>);

impl TagList {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|t| t.name == name).map(|t| t.value.as_str())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Tag::new(name, value));
    }
}

pub mod well_known {
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const BUNDLE_FORMAT: &str = "Bundle-Format";
    pub const BUNDLE_VERSION: &str = "Bundle-Version";
    pub const APP_NAME: &str = "App-Name";

    pub const BUNDLE_FORMAT_VALUE: &str = "binary";
    pub const BUNDLE_VERSION_VALUE: &str = "2.0.0";

    /// Content-type tag value that marks an item as a nested bundle (§4.8 unbundle-nested).
    pub const NESTED_BUNDLE_CONTENT_TYPE: &str = "application/x.arbundle";
}

/// Fields decoded once from an envelope's tag array, per the design note above.
#[derive(Debug, Clone, Default)]
pub struct DecodedTags {
    pub content_type: Option<String>,
    pub app_name: Option<String>,
    pub is_nested_bundle: bool,
}

impl From<&TagList> for DecodedTags {
    fn from(tags: &TagList) -> Self {
        let content_type = tags.get(well_known::CONTENT_TYPE).map(str::to_string);
        let is_nested_bundle = content_type.as_deref() == Some(well_known::NESTED_BUNDLE_CONTENT_TYPE);
        Self {
            app_name: tags.get(well_known::APP_NAME).map(str::to_string),
            is_nested_bundle,
            content_type,
        }
    }
}
