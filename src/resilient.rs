//! Resilient store proxy
//!
//! [`ResilientStore`] owns one handle to a [`GraphStore`] and the config used to
//! open it. Every pass-through operation goes through [`ResilientStore::interact`]:
//!
//! 1. run the operation against the open handle
//! 2. on failure, record it, close the handle, reopen with the cached
//!    credentials (create defaults to false) and run the operation once more
//! 3. a second failure is returned to the caller unchanged
//!
//! There is exactly one retry per call and no backoff. All operations take
//! `&mut self`, so a shared proxy has to sit behind a lock that covers both
//! the operation and a possible reconnect.

use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};
use crate::config::{ConfigSource, ConnectionConfig, Credentials};
use crate::graph::MemoryGraph;
use crate::namespace::{NamespaceMap, QName};
use crate::store::{GraphStore, QueryRows, SqliteGraphStore};
use crate::term::{Quad, Term, Triple, TriplePattern};
use crate::{Error, Result};

/// Exact phrase [`ResilientStore::destroy`] requires
pub const DESTROY_CONFIRMATION: &str = "I know what I am doing";

/// One-shot sequence of matches returned by the read operations
pub type Matches<T> = std::vec::IntoIter<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Open,
}

/// Diagnostics for a first attempt that failed and triggered a reconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub operation: &'static str,
    pub arguments: String,
    pub error: String,
}

/// Self-healing front-end over one graph store connection.
pub struct ResilientStore<S: GraphStore = SqliteGraphStore> {
    config: ConnectionConfig,
    store: S,
    state: LinkState,
    /// Set through `set_credentials`
    credentials: Credentials,
    /// Effective credentials of the last `setup`, reused by reconnects
    session: Credentials,
    create_policy: Option<bool>,
    last_failure: Option<FailureRecord>,
}

impl ResilientStore<SqliteGraphStore> {
    /// Proxy over a SQLite store for the config's base identifier
    pub fn new(config: ConnectionConfig) -> Self {
        let store = SqliteGraphStore::new(config.base_identifier());
        Self::with_store(config, store)
    }

    /// Build the config through [`ConnectionConfig::factory`] first
    pub fn from_source(source: impl Into<ConfigSource>) -> Result<Self> {
        Ok(Self::new(ConnectionConfig::factory(source)?))
    }
}

impl<S: GraphStore> ResilientStore<S> {
    pub fn with_store(config: ConnectionConfig, store: S) -> Self {
        Self {
            config,
            store,
            state: LinkState::Closed,
            credentials: Credentials::default(),
            session: Credentials::default(),
            create_policy: None,
            last_failure: None,
        }
    }

    /// Always open with this create flag, whatever `setup` is given
    pub fn with_create_policy(mut self, create: bool) -> Self {
        self.create_policy = Some(create);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Graph identifier (the ontology's base IRI)
    pub fn identifier(&self) -> &str {
        self.config.base_identifier()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn last_failure(&self) -> Option<&FailureRecord> {
        self.last_failure.as_ref()
    }

    /// Credentials used by later `setup` calls that do not pass their own
    pub fn set_credentials(&mut self, username: Option<String>, password: Option<String>) {
        self.credentials = Credentials { username, password };
    }

    /// Open the store at the config's connection string and bind its namespaces.
    ///
    /// A fixed create policy overrides `create`. Credentials come from the
    /// arguments, then `set_credentials`, then the config itself. Reconnects reuse
    /// the credentials of the last successful `setup`.
    pub fn setup(&mut self, create: bool, username: Option<&str>, password: Option<&str>) -> Result<()> {
        let create = self.create_policy.unwrap_or(create);
        let credentials = Credentials {
            username: username.map(str::to_owned),
            password: password.map(str::to_owned),
        }
        .or(&self.credentials);

        self.open_link(create, &credentials)?;
        self.session = credentials;
        info!("Connected to {} (graph {})", self.config.display_uri(), self.identifier());
        Ok(())
    }

    /// Close the handle. Failures are logged, the proxy always ends closed.
    pub fn close_link(&mut self) {
        if let Err(e) = self.store.close() {
            warn!("Exception in closing link to {}: {}", self.config.display_uri(), e);
        }
        self.state = LinkState::Closed;
    }

    /// Irreversibly delete this graph's data from the backing store.
    ///
    /// Only runs when `confirmation` is exactly [`DESTROY_CONFIRMATION`]; anything
    /// else is a [`Error::GuardViolation`] and touches nothing.
    pub fn destroy(&mut self, confirmation: &str) -> Result<()> {
        if confirmation != DESTROY_CONFIRMATION {
            warn!("Destroy of graph {} rejected: wrong confirmation phrase", self.identifier());
            return Err(Error::GuardViolation);
        }

        let identifier = self.identifier().to_string();
        self.interact("destroy", &identifier, |store| store.destroy(&identifier))?;
        self.close_link();
        warn!("Destroyed graph {} at {}", identifier, self.config.display_uri());
        Ok(())
    }

    /// Parse an ontology file into a transient graph and union it into the store.
    /// Returns the number of triples read from the file.
    pub fn merge_file_into_db(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let identifier = self.identifier().to_string();
        self.interact("merge_file_into_db", &path, |store| {
            let graph = MemoryGraph::parse(path)?;
            let quads: Vec<Quad> = graph.iter().map(|t| Quad::new(t.clone(), identifier.clone())).collect();
            store.add_quads(&quads)?;
            Ok(quads.len())
        })
    }

    pub fn bind(&mut self, prefix: &str, namespace: &str, override_existing: bool) -> Result<()> {
        let prefix = prefix.to_lowercase();
        self.interact("bind", &(&prefix, namespace, override_existing), |store| {
            store.bind(&prefix, namespace, override_existing)
        })
    }

    pub fn namespaces(&mut self) -> Result<NamespaceMap> {
        self.interact("namespaces", &(), |store| store.namespaces())
    }

    pub fn query(&mut self, text: &str, bindings: &[(&str, Term)]) -> Result<QueryRows> {
        self.interact("query", &(text, bindings), |store| store.query(text, bindings))
    }

    /// Add one triple to this graph
    pub fn add(&mut self, triple: &Triple) -> Result<()> {
        self.interact("add", triple, |store| store.add(triple))
    }

    /// Add many triples, each stamped with this proxy's graph identifier as context
    pub fn add_many(&mut self, triples: &[Triple]) -> Result<()> {
        let quads: Vec<Quad> = triples
            .iter()
            .map(|t| Quad::new(t.clone(), self.identifier()))
            .collect();
        self.interact("add_many", &triples, |store| store.add_quads(&quads))
    }

    /// Remove every triple matching the pattern; `None` fields match anything
    pub fn remove(&mut self, pattern: &TriplePattern) -> Result<usize> {
        self.interact("remove", pattern, |store| store.remove(pattern))
    }

    /// Replace the object of (subject, predicate), keeping one value per pair
    pub fn set(&mut self, triple: &Triple) -> Result<()> {
        self.interact("set", triple, |store| store.set(triple))
    }

    pub fn triples(&mut self, pattern: &TriplePattern) -> Result<Matches<Triple>> {
        self.interact("triples", pattern, |store| store.triples(pattern))
            .map(Vec::into_iter)
    }

    pub fn subjects(&mut self, predicate: Option<&Term>, object: Option<&Term>) -> Result<Matches<Term>> {
        self.interact("subjects", &(predicate, object), |store| store.subjects(predicate, object))
            .map(Vec::into_iter)
    }

    pub fn objects(&mut self, subject: Option<&Term>, predicate: Option<&Term>) -> Result<Matches<Term>> {
        self.interact("objects", &(subject, predicate), |store| store.objects(subject, predicate))
            .map(Vec::into_iter)
    }

    pub fn predicates(&mut self, subject: Option<&Term>, object: Option<&Term>) -> Result<Matches<Term>> {
        self.interact("predicates", &(subject, object), |store| store.predicates(subject, object))
            .map(Vec::into_iter)
    }

    pub fn subject_objects(&mut self, predicate: Option<&Term>) -> Result<Matches<(Term, Term)>> {
        self.interact("subject_objects", &predicate, |store| store.subject_objects(predicate))
            .map(Vec::into_iter)
    }

    pub fn subject_predicates(&mut self, object: Option<&Term>) -> Result<Matches<(Term, Term)>> {
        self.interact("subject_predicates", &object, |store| store.subject_predicates(object))
            .map(Vec::into_iter)
    }

    pub fn predicate_objects(&mut self, subject: Option<&Term>) -> Result<Matches<(Term, Term)>> {
        self.interact("predicate_objects", &subject, |store| store.predicate_objects(subject))
            .map(Vec::into_iter)
    }

    /// Start node and all its ancestors along `predicate`
    pub fn transitive_subjects(&mut self, predicate: &Term, object: &Term) -> Result<Matches<Term>> {
        self.interact("transitive_subjects", &(predicate, object), |store| {
            store.transitive_subjects(predicate, object)
        })
        .map(Vec::into_iter)
    }

    /// Start node and all its descendants along `predicate`
    pub fn transitive_objects(&mut self, subject: &Term, predicate: &Term) -> Result<Matches<Term>> {
        self.interact("transitive_objects", &(subject, predicate), |store| {
            store.transitive_objects(subject, predicate)
        })
        .map(Vec::into_iter)
    }

    /// See [`GraphStore::value`]
    pub fn value(
        &mut self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        default: Option<Term>,
        any: bool,
    ) -> Result<Option<Term>> {
        self.interact("value", &(subject, predicate, object, &default, any), |store| {
            store.value(subject, predicate, object, default.clone(), any)
        })
    }

    pub fn compute_qname(&mut self, uri: &str) -> Result<QName> {
        self.interact("compute_qname", &uri, |store| store.compute_qname(uri))
    }

    /// Whether any triple matches the pattern
    pub fn contains(&mut self, pattern: &TriplePattern) -> Result<bool> {
        self.interact("contains", pattern, |store| store.contains(pattern))
    }

    /// Number of triples in this graph
    pub fn len(&mut self) -> Result<usize> {
        self.interact("len", &(), |store| store.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        self.interact("is_empty", &(), |store| store.is_empty())
    }

    /// Run `call` against the store, reconnecting and retrying exactly once on failure
    fn interact<T, F>(&mut self, operation: &'static str, arguments: &dyn fmt::Debug, mut call: F) -> Result<T>
    where
        F: FnMut(&mut S) -> Result<T>,
    {
        let error = match self.attempt(&mut call) {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        warn!(
            operation,
            arguments = ?arguments,
            error = %error,
            "Store call failed, reconnecting to {}",
            self.config.display_uri()
        );
        self.last_failure = Some(FailureRecord {
            operation,
            arguments: format!("{:?}", arguments),
            error: error.to_string(),
        });

        self.close_link();
        let session = self.session.clone();
        self.open_link(self.create_policy.unwrap_or(false), &session)?;
        info!(operation, "Re-connected to {}", self.config.display_uri());

        self.attempt(&mut call)
    }

    fn attempt<T, F>(&mut self, call: &mut F) -> Result<T>
    where
        F: FnMut(&mut S) -> Result<T>,
    {
        if self.state != LinkState::Open {
            return Err(Error::NotConnected);
        }
        call(&mut self.store)
    }

    fn open_link(&mut self, create: bool, credentials: &Credentials) -> Result<()> {
        if self.state == LinkState::Open {
            self.close_link();
        }

        let uri = self
            .config
            .resolved_uri(credentials.username.as_deref(), credentials.password.as_deref());
        self.store.open(&uri, create)?;
        self.state = LinkState::Open;

        for (prefix, namespace) in self.config.namespaces().iter() {
            self.store.bind(&prefix.to_lowercase(), namespace, true)?;
        }
        debug!(
            "Opened {} (create: {}, namespaces: {})",
            self.config.display_uri(),
            create,
            self.config.namespaces().len()
        );
        Ok(())
    }
}

impl<S: GraphStore> Drop for ResilientStore<S> {
    fn drop(&mut self) {
        if self.state == LinkState::Open {
            self.close_link();
        }
    }
}
