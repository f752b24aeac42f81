//! Namespace bindings - short prefix to namespace IRI

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const FOAF: &str = "http://xmlns.com/foaf/0.1/";

/// Ordered prefix → namespace IRI mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceMap {
    bindings: BTreeMap<String, String>,
}

impl NamespaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `prefix` to `namespace`.
    ///
    /// An existing binding for `prefix` is replaced only when `override_existing` is set.
    /// Returns whether the mapping changed.
    pub fn bind(&mut self, prefix: impl Into<String>, namespace: impl Into<String>, override_existing: bool) -> bool {
        let prefix = prefix.into();
        let namespace = namespace.into();
        match self.bindings.get(&prefix) {
            Some(current) if current == &namespace => false,
            Some(_) if !override_existing => false,
            _ => {
                self.bindings.insert(prefix, namespace);
                true
            }
        }
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }

    /// Find the prefix bound to a namespace IRI
    pub fn prefix_for(&self, namespace: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, ns)| ns.as_str() == namespace)
            .map(|(prefix, _)| prefix.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().map(|(p, ns)| (p.as_str(), ns.as_str()))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// First `nsN` prefix that is not bound yet
    pub fn fresh_prefix(&self) -> String {
        (1..)
            .map(|n| format!("ns{}", n))
            .find(|candidate| !self.bindings.contains_key(candidate))
            .unwrap_or_default()
    }
}

impl<P: Into<String>, N: Into<String>> FromIterator<(P, N)> for NamespaceMap {
    fn from_iter<I: IntoIterator<Item = (P, N)>>(iter: I) -> Self {
        let mut map = NamespaceMap::new();
        for (prefix, namespace) in iter {
            map.bind(prefix, namespace, true);
        }
        map
    }
}

/// A compact name: namespace IRI split into a bound prefix and a local part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: String,
    pub namespace: String,
    pub local: String,
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.local)
    }
}

/// Split an IRI into namespace and local name at the last `#`, `/` or `:`.
///
/// Returns `None` when there is no separator or the local part would be empty.
pub fn split_iri(iri: &str) -> Option<(&str, &str)> {
    let idx = iri.rfind('#').or_else(|| iri.rfind('/')).or_else(|| iri.rfind(':'))?;
    let (namespace, local) = iri.split_at(idx + 1);
    if local.is_empty() || namespace.is_empty() {
        return None;
    }
    Some((namespace, local))
}
