//! Selectors address one or more levels of the hierarchy.
//!
//! A selector is an ordered list of elements; each element matches one
//! named child, a group of named children, or every child (`*`). In JSON
//! an element is either a string (`"host123"`, `"*"`) or an array of
//! strings (`["cpu0", "cpu1"]`).

use crate::core::Result;
use crate::storage::buffer::BufferChain;
use crate::storage::level::Level;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorElement {
    /// Match the one child with this name.
    String(String),
    /// Match every child named in the group.
    Group(Vec<String>),
    /// Match every child at this depth.
    Any,
}

pub type Selector = Vec<SelectorElement>;

impl Serialize for SelectorElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SelectorElement::String(name) => serializer.serialize_str(name),
            SelectorElement::Any => serializer.serialize_str("*"),
            SelectorElement::Group(names) => {
                let mut seq = serializer.serialize_seq(Some(names.len()))?;
                for name in names {
                    seq.serialize_element(name)?;
                }
                seq.end()
            },
        }
    }
}

struct SelectorElementVisitor;

impl<'de> Visitor<'de> for SelectorElementVisitor {
    type Value = SelectorElement;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or an array of strings")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Self::Value, E> {
        if value == "*" {
            Ok(SelectorElement::Any)
        } else {
            Ok(SelectorElement::String(value.to_string()))
        }
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let mut names = Vec::new();
        while let Some(name) = seq.next_element::<String>()? {
            names.push(name);
        }
        Ok(SelectorElement::Group(names))
    }
}

impl<'de> Deserialize<'de> for SelectorElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(SelectorElementVisitor)
    }
}

impl Level {
    /// Call `f` on the buffer chain of every level matched by `selector`.
    ///
    /// Once the selector is exhausted, a level that holds the metric is
    /// the terminal match; a level that does not recurses into all of
    /// its children, which is what aggregates e.g. per-cpu metrics up to
    /// a host-level query. Traversal takes read locks only.
    pub(crate) fn find_buffers<F>(
        &self,
        selector: &[SelectorElement],
        offset: usize,
        f: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&BufferChain) -> Result<()>,
    {
        let inner = self.inner.read();

        if selector.is_empty() {
            if let Some(chain) = inner.metrics.get(offset).and_then(Option::as_ref) {
                return f(chain);
            }

            for child in inner.children.values() {
                child.find_buffers(&[], offset, f)?;
            }
            return Ok(());
        }

        match &selector[0] {
            SelectorElement::String(name) => {
                if let Some(child) = inner.children.get(name) {
                    child.find_buffers(&selector[1..], offset, f)?;
                }
            },
            SelectorElement::Group(names) => {
                for name in names {
                    if let Some(child) = inner.children.get(name) {
                        child.find_buffers(&selector[1..], offset, f)?;
                    }
                }
            },
            SelectorElement::Any => {
                for child in inner.children.values() {
                    child.find_buffers(&selector[1..], offset, f)?;
                }
            },
        }
        Ok(())
    }
}

/// Shorthand for building a selector of literal path elements.
pub fn path_selector(parts: &[&str]) -> Selector {
    parts
        .iter()
        .map(|p| SelectorElement::String((*p).to_string()))
        .collect()
}
