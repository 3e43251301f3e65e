//! HAL+JSON document model used by the Chain API.

use serde::Deserialize;
use serde_json::{Map, Value};

/// The `_links` object of a HAL document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct HalLinks(Map<String, Value>);

impl HalLinks {
    /// First `href` under `rel`. Accepts a single link or an array.
    #[must_use]
    pub fn href(&self, rel: &str) -> Option<&str> {
        self.hrefs(rel).into_iter().next()
    }

    /// Every `href` under `rel`.
    #[must_use]
    pub fn hrefs(&self, rel: &str) -> Vec<&str> {
        match self.0.get(rel) {
            Some(Value::Array(links)) => links.iter().filter_map(link_href).collect(),
            Some(link) => link_href(link).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

fn link_href(link: &Value) -> Option<&str> {
    link.get("href").and_then(Value::as_str)
}

/// A generic HAL resource.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HalDocument {
    /// Links to related resources.
    #[serde(rename = "_links", default)]
    pub links: HalLinks,
    /// Embedded resources by relation.
    #[serde(rename = "_embedded", default)]
    pub embedded: Map<String, Value>,
    /// Remaining properties of the resource.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl HalDocument {
    /// The resource's own URL.
    #[must_use]
    pub fn self_href(&self) -> Option<&str> {
        self.links.href("self")
    }

    /// A string property.
    #[must_use]
    pub fn str_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// Embedded resources under `rel`. Entries that are not objects are
    /// skipped.
    #[must_use]
    pub fn embedded(&self, rel: &str) -> Vec<Self> {
        let docs = match self.embedded.get(rel) {
            Some(Value::Array(docs)) => docs.as_slice(),
            Some(doc) => std::slice::from_ref(doc),
            None => &[],
        };
        docs.iter()
            .filter_map(|doc| serde_json::from_value(doc.clone()).ok())
            .collect()
    }
}

/// One recorded value in a `scalar_data` page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScalarDatum {
    /// Reading time.
    #[serde(default)]
    pub timestamp: Value,
    /// Reading value.
    #[serde(default)]
    pub value: Value,
    /// Links, possibly naming the sensor as `ch:sensor`.
    #[serde(rename = "_links", default)]
    pub links: HalLinks,
}

/// One page of a `scalar_data` query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScalarDataPage {
    /// Readings on this page.
    #[serde(default)]
    pub data: Vec<ScalarDatum>,
    /// Paging links.
    #[serde(rename = "_links", default)]
    pub links: HalLinks,
}
