//! Memory Graph - transient, unconnected graph
//!
//! Used to load an ontology file before merging it into a store. Holds a set
//! of triples with subject and object indexes for pattern lookups.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use crate::term::{Term, Triple, TriplePattern};
use crate::{Error, Result};

/// In-memory triple set, never attached to a backing store.
#[derive(Debug, Default, Clone)]
pub struct MemoryGraph {
    triples: BTreeSet<Triple>,
    by_subject: HashMap<Term, Vec<Triple>>,
    by_object: HashMap<Term, Vec<Triple>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a graph from a file. The format is chosen by extension.
    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "nt" | "ntriples" => {
                let contents = std::fs::read_to_string(path)?;
                let graph = Self::from_ntriples(&contents)?;
                tracing::debug!("Parsed {} triples from {}", graph.len(), path.display());
                Ok(graph)
            }
            _ => Err(Error::UnsupportedFormat(format!(
                "{} (only N-Triples .nt files are supported)",
                path.display()
            ))),
        }
    }

    /// Parse N-Triples text, one statement per line
    pub fn from_ntriples(text: &str) -> Result<Self> {
        let mut graph = Self::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let triple = parse_statement(line).map_err(|e| Error::Parse {
                line: idx + 1,
                message: e.to_string(),
            })?;
            graph.add(triple);
        }
        Ok(graph)
    }

    /// Add a triple. Returns false if it was already present.
    pub fn add(&mut self, triple: Triple) -> bool {
        if !self.triples.insert(triple.clone()) {
            return false;
        }
        self.by_subject
            .entry(triple.subject.clone())
            .or_default()
            .push(triple.clone());
        self.by_object.entry(triple.object.clone()).or_default().push(triple);
        true
    }

    /// Union another graph into this one
    pub fn extend(&mut self, other: &MemoryGraph) {
        for triple in other.iter() {
            self.add(triple.clone());
        }
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    /// Triples matching a pattern, in sorted order
    pub fn triples(&self, pattern: &TriplePattern) -> Vec<&Triple> {
        let candidates: Box<dyn Iterator<Item = &Triple>> = match (&pattern.subject, &pattern.object) {
            (Some(subject), _) => Box::new(self.by_subject.get(subject).into_iter().flatten()),
            (None, Some(object)) => Box::new(self.by_object.get(object).into_iter().flatten()),
            (None, None) => Box::new(self.triples.iter()),
        };
        let mut matched: Vec<&Triple> = candidates.filter(|t| t.matches(pattern)).collect();
        matched.sort();
        matched
    }

    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Serialise as N-Triples, one statement per line
    pub fn to_ntriples(&self) -> String {
        self.triples.iter().map(|t| format!("{}\n", t)).collect()
    }
}

impl std::ops::AddAssign<&MemoryGraph> for MemoryGraph {
    fn add_assign(&mut self, other: &MemoryGraph) {
        self.extend(other);
    }
}

impl FromIterator<Triple> for MemoryGraph {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        let mut graph = MemoryGraph::new();
        for triple in iter {
            graph.add(triple);
        }
        graph
    }
}

fn parse_statement(line: &str) -> Result<Triple> {
    let (subject, rest) = Term::parse_prefix(line)?;
    let (predicate, rest) = Term::parse_prefix(rest)?;
    let (object, rest) = Term::parse_prefix(rest)?;

    if subject.is_literal() {
        return Err(Error::InvalidTerm("Subject cannot be a literal".to_string()));
    }
    if predicate.as_iri().is_none() {
        return Err(Error::InvalidTerm("Predicate must be an IRI".to_string()));
    }

    let rest = rest.trim_start();
    let rest = rest
        .strip_prefix('.')
        .ok_or_else(|| Error::InvalidTerm("Statement must end with '.'".to_string()))?;
    let rest = rest.trim();
    if !rest.is_empty() && !rest.starts_with('#') {
        return Err(Error::InvalidTerm(format!("Unexpected input after statement: {}", rest)));
    }
    Ok(Triple::new(subject, predicate, object))
}
