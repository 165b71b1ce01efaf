use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::event::{Event, Value};

/// Canonical key of an extracted dimension tuple.
///
/// Identity, ordering and hashing use a single serialised string
/// (`field \x1e tag value`, joined by `\x1f`), so the key works directly as a
/// map key for condition slices and bucket accumulators. The original values
/// are kept for output.
#[derive(Debug, Clone, Default)]
pub struct DimensionKey {
    canonical: String,
    values: Vec<(String, Value)>,
}

impl DimensionKey {
    /// The key of unsliced state.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<(String, Value)>) -> Self {
        let mut canonical = String::new();
        for (i, (field, value)) in values.iter().enumerate() {
            if i > 0 {
                canonical.push('\x1f');
            }
            canonical.push_str(field);
            canonical.push('\x1e');
            canonical.push(value.type_tag());
            canonical.push_str(&value.to_string());
        }
        Self { canonical, values }
    }

    /// Extract `fields` from `event` in order. `None` if any is missing.
    pub fn extract(event: &Event, fields: &[String]) -> Option<Self> {
        if fields.is_empty() {
            return Some(Self::empty());
        }
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push((field.clone(), event.field(field)?.clone()));
        }
        Some(Self::from_values(values))
    }

    /// Extract values from the event's `source` fields, naming them after the
    /// paired `target` fields. Used to address a sliced condition from a
    /// metric's event.
    pub fn extract_linked(event: &Event, links: &[(String, String)]) -> Option<Self> {
        let mut values = Vec::with_capacity(links.len());
        for (source, target) in links {
            values.push((target.clone(), event.field(source)?.clone()));
        }
        Some(Self::from_values(values))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }
}

impl PartialEq for DimensionKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for DimensionKey {}

impl Hash for DimensionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for DimensionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DimensionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return f.write_str("*");
        }
        for (i, (field, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{field}={value}")?;
        }
        Ok(())
    }
}

impl Serialize for DimensionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in &self.values {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_in_declared_order() {
        let ev = Event::new(1, 0).with_field("uid", 10).with_field("pkg", "a");
        let key = DimensionKey::extract(&ev, &["uid".into(), "pkg".into()]).unwrap();
        assert_eq!(key.to_string(), "uid=10,pkg=a");
        assert_eq!(key.values().len(), 2);
        assert!(DimensionKey::extract(&ev, &["missing".into()]).is_none());
        assert!(DimensionKey::extract(&ev, &[]).unwrap().is_empty());
    }

    #[test]
    fn type_is_part_of_identity() {
        let int = DimensionKey::from_values(vec![("x".into(), Value::Int(2))]);
        let en = DimensionKey::from_values(vec![("x".into(), Value::Enum(2))]);
        let s = DimensionKey::from_values(vec![("x".into(), Value::Str("2".into()))]);
        assert_ne!(int, en);
        assert_ne!(int, s);
        assert_eq!(int, DimensionKey::from_values(vec![("x".into(), Value::Int(2))]));
    }

    #[test]
    fn linked_extraction_renames_fields() {
        let ev = Event::new(1, 0).with_field("app_uid", 7);
        let linked =
            DimensionKey::extract_linked(&ev, &[("app_uid".into(), "uid".into())]).unwrap();
        let direct =
            DimensionKey::extract(&Event::new(2, 0).with_field("uid", 7), &["uid".into()]).unwrap();
        assert_eq!(linked, direct);
    }

    #[test]
    fn serializes_as_map() {
        let key = DimensionKey::from_values(vec![("uid".into(), Value::Int(3))]);
        assert_eq!(serde_json::to_string(&key).unwrap(), r#"{"uid":3}"#);
        assert_eq!(serde_json::to_string(&DimensionKey::empty()).unwrap(), "{}");
    }
}
