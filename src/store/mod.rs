//! Storage Layer - the graph store contract and its SQLite backend
//!
//! [`GraphStore`] is what the resilient proxy drives. A backend implements the
//! primitive operations (open/close/destroy, bind, add, remove, pattern match,
//! count, query); the derived reads (subjects, objects, transitive walks,
//! `value`, `set`, `compute_qname`) are provided on top of them.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteGraphStore;

use std::collections::{HashSet, VecDeque};
use serde::Serialize;
use crate::namespace::{NamespaceMap, QName, split_iri};
use crate::term::{Quad, Term, Triple, TriplePattern};
use crate::{Error, Result};

/// Tabular result of [`GraphStore::query`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<Term>>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl IntoIterator for QueryRows {
    type Item = Vec<Option<Term>>;
    type IntoIter = std::vec::IntoIter<Vec<Option<Term>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Backing triple store bound to one graph identifier.
pub trait GraphStore {
    /// Connect to `uri`. With `create` the schema is initialised (idempotent);
    /// without it a missing schema is [`Error::SchemaMissing`].
    fn open(&mut self, uri: &str, create: bool) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Irreversibly delete the data stored for `identifier`
    fn destroy(&mut self, identifier: &str) -> Result<()>;

    fn bind(&mut self, prefix: &str, namespace: &str, override_existing: bool) -> Result<()>;

    fn namespaces(&self) -> Result<NamespaceMap>;

    /// Add one triple to this store's own graph
    fn add(&mut self, triple: &Triple) -> Result<()>;

    /// Add triples with an explicit context each
    fn add_quads(&mut self, quads: &[Quad]) -> Result<()>;

    /// Remove every triple matching the pattern, returning how many were removed
    fn remove(&mut self, pattern: &TriplePattern) -> Result<usize>;

    fn triples(&self, pattern: &TriplePattern) -> Result<Vec<Triple>>;

    fn len(&self) -> Result<usize>;

    /// Run a backend-specific read-only query with named bindings
    fn query(&self, text: &str, bindings: &[(&str, Term)]) -> Result<QueryRows>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn contains(&self, pattern: &TriplePattern) -> Result<bool> {
        Ok(!self.triples(pattern)?.is_empty())
    }

    fn subjects(&self, predicate: Option<&Term>, object: Option<&Term>) -> Result<Vec<Term>> {
        let pattern = TriplePattern::new(None, predicate.cloned(), object.cloned());
        Ok(distinct(self.triples(&pattern)?.into_iter().map(|t| t.subject)))
    }

    fn objects(&self, subject: Option<&Term>, predicate: Option<&Term>) -> Result<Vec<Term>> {
        let pattern = TriplePattern::new(subject.cloned(), predicate.cloned(), None);
        Ok(distinct(self.triples(&pattern)?.into_iter().map(|t| t.object)))
    }

    fn predicates(&self, subject: Option<&Term>, object: Option<&Term>) -> Result<Vec<Term>> {
        let pattern = TriplePattern::new(subject.cloned(), None, object.cloned());
        Ok(distinct(self.triples(&pattern)?.into_iter().map(|t| t.predicate)))
    }

    fn subject_objects(&self, predicate: Option<&Term>) -> Result<Vec<(Term, Term)>> {
        let pattern = TriplePattern::new(None, predicate.cloned(), None);
        Ok(distinct(self.triples(&pattern)?.into_iter().map(|t| (t.subject, t.object))))
    }

    fn subject_predicates(&self, object: Option<&Term>) -> Result<Vec<(Term, Term)>> {
        let pattern = TriplePattern::new(None, None, object.cloned());
        Ok(distinct(self.triples(&pattern)?.into_iter().map(|t| (t.subject, t.predicate))))
    }

    fn predicate_objects(&self, subject: Option<&Term>) -> Result<Vec<(Term, Term)>> {
        let pattern = TriplePattern::new(subject.cloned(), None, None);
        Ok(distinct(self.triples(&pattern)?.into_iter().map(|t| (t.predicate, t.object))))
    }

    /// Walk backwards along `predicate` from `object`: the start node, then every ancestor
    fn transitive_subjects(&self, predicate: &Term, object: &Term) -> Result<Vec<Term>> {
        walk(object, |node| self.subjects(Some(predicate), Some(node)))
    }

    /// Walk forwards along `predicate` from `subject`: the start node, then every descendant
    fn transitive_objects(&self, subject: &Term, predicate: &Term) -> Result<Vec<Term>> {
        walk(subject, |node| self.objects(Some(node), Some(predicate)))
    }

    /// Single value lookup for the one unbound position.
    ///
    /// Exactly one position must be free: with two or three free positions there is
    /// no single value to look up and `default` is returned. Returns `default` when
    /// nothing matches; with `any == false` more than one match is an [`Error::Uniqueness`].
    fn value(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        default: Option<Term>,
        any: bool,
    ) -> Result<Option<Term>> {
        let values = match (subject, predicate, object) {
            (Some(s), None, Some(o)) => self.predicates(Some(s), Some(o))?,
            (None, Some(p), Some(o)) => self.subjects(Some(p), Some(o))?,
            (Some(s), Some(p), None) => self.objects(Some(s), Some(p))?,
            (Some(_), Some(_), Some(_)) => {
                return Err(Error::InvalidPattern(
                    "value() needs at least one unbound position".to_string(),
                ));
            }
            _ => return Ok(default),
        };

        let mut values = values.into_iter();
        match values.next() {
            None => Ok(default),
            Some(first) => {
                if !any && values.next().is_some() {
                    return Err(Error::Uniqueness(format!(
                        "more than one value for ({}, {}, {})",
                        describe(subject),
                        describe(predicate),
                        describe(object)
                    )));
                }
                Ok(Some(first))
            }
        }
    }

    /// Replace every object of (subject, predicate) with the triple's object
    fn set(&mut self, triple: &Triple) -> Result<()> {
        let pattern = TriplePattern::new(Some(triple.subject.clone()), Some(triple.predicate.clone()), None);
        self.remove(&pattern)?;
        self.add(triple)
    }

    /// Split `uri` into a bound prefix and local name, binding a fresh `nsN` prefix if needed
    fn compute_qname(&mut self, uri: &str) -> Result<QName> {
        let (namespace, local) =
            split_iri(uri).ok_or_else(|| Error::InvalidTerm(format!("Cannot split IRI into a qname: {}", uri)))?;

        let bindings = self.namespaces()?;
        let prefix = match bindings.prefix_for(namespace) {
            Some(prefix) => prefix.to_string(),
            None => {
                let prefix = bindings.fresh_prefix();
                self.bind(&prefix, namespace, false)?;
                prefix
            }
        };

        Ok(QName {
            prefix,
            namespace: namespace.to_string(),
            local: local.to_string(),
        })
    }
}

/// Keep the first occurrence of each item, preserving order
fn distinct<T, I>(items: I) -> Vec<T>
where
    T: Clone + Eq + std::hash::Hash,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

/// Breadth-first closure from `start`, visiting each node once
fn walk<F>(start: &Term, mut next: F) -> Result<Vec<Term>>
where
    F: FnMut(&Term) -> Result<Vec<Term>>,
{
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut order = Vec::new();

    visited.insert(start.clone());
    queue.push_back(start.clone());

    while let Some(node) = queue.pop_front() {
        for neighbour in next(&node)? {
            if visited.insert(neighbour.clone()) {
                queue.push_back(neighbour);
            }
        }
        order.push(node);
    }

    Ok(order)
}

fn describe(term: Option<&Term>) -> String {
    term.map(Term::to_ntriples).unwrap_or_else(|| "*".to_string())
}
