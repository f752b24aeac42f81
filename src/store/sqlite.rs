//! SQLite graph store implementation

use std::path::PathBuf;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params, params_from_iter};
use tracing::{debug, info};
use crate::config::IN_MEMORY_URI;
use crate::namespace::{NamespaceMap, XSD};
use crate::term::{Literal, Quad, Term, Triple, TriplePattern};
use crate::{Error, Result};
use super::schema::TableNames;
use super::{GraphStore, QueryRows};

const FILE_URI_PREFIX: &str = "sqlite:///";

/// Where a connection string points
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    File(PathBuf),
}

impl Target {
    fn parse(uri: &str) -> Result<Self> {
        if uri == IN_MEMORY_URI {
            return Ok(Target::Memory);
        }
        match uri.strip_prefix(FILE_URI_PREFIX) {
            Some(path) if !path.is_empty() => Ok(Target::File(PathBuf::from(path))),
            _ => Err(Error::StoreUnavailable {
                target: uri.split_once("://").map(|(scheme, _)| scheme).unwrap_or("unknown").to_string(),
                reason: "no SQLite database in this connection string".to_string(),
            }),
        }
    }
}

/// SQLite-backed triple store holding one graph (context) per identifier.
///
/// `sqlite://` opens an in-memory database that lives as long as this value:
/// closing parks the connection and the next in-memory `open` picks it up again.
pub struct SqliteGraphStore {
    identifier: String,
    tables: TableNames,
    conn: Option<Connection>,
    in_memory: bool,
    parked: Option<Connection>,
}

impl SqliteGraphStore {
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let tables = TableNames::for_identifier(&identifier);
        Self {
            identifier,
            tables,
            conn: None,
            in_memory: false,
            parked: None,
        }
    }

    /// Graph identifier used as the context of every triple added through `add`
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether the tables for this identifier exist
    pub fn has_schema(&self) -> Result<bool> {
        Self::schema_present(self.conn()?, &self.tables)
    }

    fn schema_present(conn: &Connection, tables: &TableNames) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2)",
            params![tables.quads, tables.namespaces],
            |row| row.get(0),
        )?;
        Ok(count == 2)
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::NotConnected)
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(Error::NotConnected)
    }

    fn connect(&mut self, target: &Target, create: bool) -> Result<Connection> {
        match target {
            Target::Memory => match self.parked.take() {
                Some(conn) => Ok(conn),
                None => Connection::open_in_memory().map_err(|e| Error::StoreUnavailable {
                    target: IN_MEMORY_URI.to_string(),
                    reason: e.to_string(),
                }),
            },
            Target::File(path) => {
                if !create && !path.exists() {
                    return Err(Error::SchemaMissing {
                        identifier: self.identifier.clone(),
                    });
                }
                let flags = if create {
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
                } else {
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                };
                Connection::open_with_flags(path, flags).map_err(|e| Error::StoreUnavailable {
                    target: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Create or check the schema, then (re)create the temporary graph view
    fn prepare(&self, conn: &Connection, create: bool) -> Result<()> {
        if create {
            for stmt in self.tables.create_statements() {
                conn.execute(&stmt, [])?;
            }
        } else if !Self::schema_present(conn, &self.tables)? {
            return Err(Error::SchemaMissing {
                identifier: self.identifier.clone(),
            });
        }

        for stmt in self.tables.graph_view_statements(&self.identifier) {
            conn.execute(&stmt, [])?;
        }
        Ok(())
    }

    /// WHERE clause and positional values selecting a pattern in this graph
    fn pattern_clause(&self, pattern: &TriplePattern) -> (String, Vec<String>) {
        let mut clause = String::from("context = ?1");
        let mut values = vec![self.identifier.clone()];
        for (column, term) in [
            ("subject", &pattern.subject),
            ("predicate", &pattern.predicate),
            ("object", &pattern.object),
        ] {
            if let Some(term) = term {
                values.push(term.to_ntriples());
                clause.push_str(&format!(" AND {} = ?{}", column, values.len()));
            }
        }
        (clause, values)
    }

    /// Helper to convert a row to a Triple
    fn row_to_triple(row: &rusqlite::Row) -> rusqlite::Result<Triple> {
        let decode = |idx: usize| -> rusqlite::Result<Term> {
            let text: String = row.get(idx)?;
            text.parse::<Term>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
            })
        };
        Ok(Triple::new(decode(0)?, decode(1)?, decode(2)?))
    }
}

impl GraphStore for SqliteGraphStore {
    fn open(&mut self, uri: &str, create: bool) -> Result<()> {
        if self.conn.is_some() {
            self.close()?;
        }

        let target = Target::parse(uri)?;
        let conn = self.connect(&target, create)?;
        let in_memory = target == Target::Memory;

        // the in-memory database goes back to the parking slot on any failure
        if let Err(e) = self.prepare(&conn, create) {
            if in_memory {
                self.parked = Some(conn);
            }
            return Err(e);
        }

        debug!("Opened graph {} (tables {})", self.identifier, self.tables.quads);
        self.in_memory = in_memory;
        self.conn = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if self.in_memory {
            self.parked = Some(conn);
            return Ok(());
        }
        conn.close().map_err(|(_, e)| Error::Storage(e))
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn destroy(&mut self, identifier: &str) -> Result<()> {
        let tables = TableNames::for_identifier(identifier);
        {
            let conn = self.conn()?;
            if identifier == self.identifier {
                conn.execute("DROP VIEW IF EXISTS temp.graph", [])?;
            }
            for stmt in tables.drop_statements() {
                conn.execute(&stmt, [])?;
            }
        }
        info!("Destroyed graph {} (tables {})", identifier, tables.quads);
        self.close()
    }

    fn bind(&mut self, prefix: &str, namespace: &str, override_existing: bool) -> Result<()> {
        let verb = if override_existing { "INSERT OR REPLACE" } else { "INSERT OR IGNORE" };
        self.conn()?.execute(
            &format!("{} INTO {} (prefix, uri) VALUES (?1, ?2)", verb, self.tables.namespaces),
            params![prefix, namespace],
        )?;
        Ok(())
    }

    fn namespaces(&self) -> Result<NamespaceMap> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT prefix, uri FROM {} ORDER BY prefix", self.tables.namespaces))?;
        let bindings = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bindings.into_iter().collect())
    }

    fn add(&mut self, triple: &Triple) -> Result<()> {
        triple.validate()?;
        self.conn()?.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (subject, predicate, object, context) VALUES (?1, ?2, ?3, ?4)",
                self.tables.quads
            ),
            params![
                triple.subject.to_ntriples(),
                triple.predicate.to_ntriples(),
                triple.object.to_ntriples(),
                self.identifier,
            ],
        )?;
        Ok(())
    }

    fn add_quads(&mut self, quads: &[Quad]) -> Result<()> {
        for quad in quads {
            quad.triple.validate()?;
        }
        let sql = format!(
            "INSERT OR IGNORE INTO {} (subject, predicate, object, context) VALUES (?1, ?2, ?3, ?4)",
            self.tables.quads
        );
        let tx = self.conn_mut()?.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for quad in quads {
                stmt.execute(params![
                    quad.triple.subject.to_ntriples(),
                    quad.triple.predicate.to_ntriples(),
                    quad.triple.object.to_ntriples(),
                    quad.context,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, pattern: &TriplePattern) -> Result<usize> {
        let (clause, values) = self.pattern_clause(pattern);
        let removed = self.conn()?.execute(
            &format!("DELETE FROM {} WHERE {}", self.tables.quads, clause),
            params_from_iter(values.iter()),
        )?;
        Ok(removed)
    }

    fn triples(&self, pattern: &TriplePattern) -> Result<Vec<Triple>> {
        let (clause, values) = self.pattern_clause(pattern);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT subject, predicate, object FROM {} WHERE {} ORDER BY id",
            self.tables.quads, clause
        ))?;
        let triples = stmt
            .query_map(params_from_iter(values.iter()), Self::row_to_triple)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(triples)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE context = ?1", self.tables.quads),
            [&self.identifier],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Read-only SQL over the temporary `graph(subject, predicate, object)` view.
    ///
    /// Bindings are named parameters (`:name` or `name`) receiving N-Triples encoded terms.
    fn query(&self, text: &str, bindings: &[(&str, Term)]) -> Result<QueryRows> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(text).map_err(|e| Error::Query(e.to_string()))?;
        if !stmt.readonly() {
            return Err(Error::Query("only read-only statements can be run as queries".to_string()));
        }

        for (name, term) in bindings {
            let key = if name.starts_with(':') {
                name.to_string()
            } else {
                format!(":{}", name)
            };
            let idx = stmt
                .parameter_index(&key)?
                .ok_or_else(|| Error::Query(format!("query has no parameter {}", key)))?;
            stmt.raw_bind_parameter(idx, term.to_ntriples())?;
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.raw_query();
        while let Some(row) = cursor.next()? {
            let mut cells = Vec::with_capacity(width);
            for idx in 0..width {
                cells.push(decode_cell(row.get_ref(idx)?));
            }
            rows.push(cells);
        }

        Ok(QueryRows { columns, rows })
    }
}

/// Turn an SQL cell into a term: encoded terms decode, other values become literals
fn decode_cell(value: ValueRef<'_>) -> Option<Term> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Term::Literal(Literal::typed(i.to_string(), format!("{}integer", XSD)))),
        ValueRef::Real(f) => Some(Term::Literal(Literal::typed(f.to_string(), format!("{}double", XSD)))),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            Some(text.parse::<Term>().unwrap_or_else(|_| Term::literal(text.into_owned())))
        }
        ValueRef::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            Some(Term::Literal(Literal::typed(hex, format!("{}hexBinary", XSD))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::FOAF;

    const GRAPH: &str = "http://example.org/onto";

    fn iri(local: &str) -> Term {
        Term::iri(format!("http://example.org/{}", local))
    }

    fn triple(s: &str, p: &str, o: &str) -> Triple {
        Triple::new(iri(s), iri(p), iri(o))
    }

    fn open_memory() -> SqliteGraphStore {
        let mut store = SqliteGraphStore::new(GRAPH);
        store.open(IN_MEMORY_URI, true).unwrap();
        store
    }

    #[test]
    fn test_open_without_schema_fails() {
        let mut store = SqliteGraphStore::new(GRAPH);
        let err = store.open(IN_MEMORY_URI, false).unwrap_err();
        assert!(matches!(err, Error::SchemaMissing { .. }));
        assert!(!store.is_open());

        store.open(IN_MEMORY_URI, true).unwrap();
        store.open(IN_MEMORY_URI, true).unwrap();
        store.close().unwrap();
        store.open(IN_MEMORY_URI, false).unwrap();
        assert!(store.has_schema().unwrap());
    }

    #[test]
    fn test_unsupported_uri() {
        let mut store = SqliteGraphStore::new(GRAPH);
        let err = store.open("mysql+pymysql://u:secret@db:3306/onto", true).unwrap_err();
        match err {
            Error::StoreUnavailable { target, .. } => assert_eq!(target, "mysql+pymysql"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_memory_survives_close() {
        let mut store = open_memory();
        store.add(&triple("Alice", "knows", "Bob")).unwrap();
        store.close().unwrap();
        assert!(matches!(store.len(), Err(Error::NotConnected)));

        store.open(IN_MEMORY_URI, false).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_add_match_remove() {
        let mut store = open_memory();
        let t = triple("Alice", "knows", "Bob");
        store.add(&t).unwrap();
        store.add(&t).unwrap();
        store.add(&triple("Alice", "knows", "Carol")).unwrap();

        assert_eq!(store.triples(&t.as_pattern()).unwrap(), vec![t.clone()]);
        assert_eq!(store.len().unwrap(), 2);

        let all_alice = TriplePattern::any().with_subject(iri("Alice"));
        assert_eq!(store.triples(&all_alice).unwrap().len(), 2);

        assert_eq!(store.remove(&t.as_pattern()).unwrap(), 1);
        assert!(store.triples(&t.as_pattern()).unwrap().is_empty());
        assert_eq!(store.remove(&all_alice).unwrap(), 1);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_literals_roundtrip() {
        let mut store = open_memory();
        let t = Triple::new(iri("Alice"), Term::iri(format!("{}name", FOAF)), Term::Literal(Literal::lang("Alice \"A\"", "en")));
        store.add(&t).unwrap();
        assert_eq!(store.triples(&TriplePattern::any()).unwrap(), vec![t]);
    }

    #[test]
    fn test_quads_with_foreign_context_are_invisible() {
        let mut store = open_memory();
        store
            .add_quads(&[
                Quad::new(triple("a", "p", "b"), GRAPH),
                Quad::new(triple("c", "p", "d"), "http://example.org/other"),
            ])
            .unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_set_and_value() {
        let mut store = open_memory();
        store.add(&triple("pump", "state", "off")).unwrap();
        store.add(&triple("pump", "state", "broken")).unwrap();
        store.set(&triple("pump", "state", "on")).unwrap();

        let value = store.value(Some(&iri("pump")), Some(&iri("state")), None, None, false).unwrap();
        assert_eq!(value, Some(iri("on")));

        let missing = store
            .value(Some(&iri("valve")), Some(&iri("state")), None, Some(iri("unknown")), true)
            .unwrap();
        assert_eq!(missing, Some(iri("unknown")));

        store.add(&triple("pump", "state", "idle")).unwrap();
        let err = store.value(Some(&iri("pump")), Some(&iri("state")), None, None, false).unwrap_err();
        assert!(matches!(err, Error::Uniqueness(_)));

        let err = store.value(Some(&iri("pump")), Some(&iri("state")), Some(&iri("on")), None, true).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern(_)));
    }

    #[test]
    fn test_value_needs_exactly_one_free_position() {
        let mut store = open_memory();
        store.add(&triple("pump", "state", "on")).unwrap();
        let fallback = Some(Term::literal("dflt"));

        assert_eq!(
            store.value(Some(&iri("pump")), None, None, fallback.clone(), true).unwrap(),
            fallback
        );
        assert_eq!(store.value(None, None, None, fallback.clone(), true).unwrap(), fallback);
        assert_eq!(store.value(None, Some(&iri("state")), None, None, true).unwrap(), None);

        assert_eq!(
            store.value(Some(&iri("pump")), None, Some(&iri("on")), None, false).unwrap(),
            Some(iri("state"))
        );
        assert_eq!(
            store.value(None, Some(&iri("state")), Some(&iri("on")), None, false).unwrap(),
            Some(iri("pump"))
        );
    }

    #[test]
    fn test_unencodable_terms_are_rejected() {
        let mut store = open_memory();
        store.add(&triple("Alice", "knows", "Bob")).unwrap();

        let spaced = Triple::new(Term::iri("http://ex/a b"), iri("p"), iri("o"));
        assert!(matches!(store.add(&spaced), Err(Error::InvalidTerm(_))));
        let bad_tag = Triple::new(iri("a"), iri("p"), Term::Literal(Literal::lang("x", "en US")));
        assert!(matches!(store.add(&bad_tag), Err(Error::InvalidTerm(_))));

        let batch = [Quad::new(triple("c", "p", "d"), GRAPH), Quad::new(spaced, GRAPH)];
        assert!(matches!(store.add_quads(&batch), Err(Error::InvalidTerm(_))));

        assert_eq!(store.triples(&TriplePattern::any()).unwrap(), vec![triple("Alice", "knows", "Bob")]);
    }

    #[test]
    fn test_failed_reopen_keeps_memory_database() {
        let mut store = open_memory();
        store.add(&triple("Alice", "knows", "Bob")).unwrap();
        {
            // a temp table named like the view makes the view statements fail
            let conn = store.conn().unwrap();
            conn.execute("DROP VIEW temp.graph", []).unwrap();
            conn.execute("CREATE TEMP TABLE graph (x)", []).unwrap();
        }
        store.close().unwrap();

        assert!(store.open(IN_MEMORY_URI, true).is_err());
        assert!(!store.is_open());

        store.parked.as_ref().unwrap().execute("DROP TABLE temp.graph", []).unwrap();
        store.open(IN_MEMORY_URI, false).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_derived_reads() {
        let mut store = open_memory();
        store.add(&triple("Alice", "knows", "Bob")).unwrap();
        store.add(&triple("Carol", "knows", "Bob")).unwrap();
        store.add(&triple("Alice", "likes", "Tea")).unwrap();

        let knows = iri("knows");
        let bob = iri("Bob");
        assert_eq!(store.subjects(Some(&knows), Some(&bob)).unwrap(), vec![iri("Alice"), iri("Carol")]);
        assert_eq!(store.objects(Some(&iri("Alice")), None).unwrap(), vec![iri("Bob"), iri("Tea")]);
        assert_eq!(store.predicates(Some(&iri("Alice")), None).unwrap(), vec![knows.clone(), iri("likes")]);
        assert_eq!(store.subject_objects(Some(&knows)).unwrap().len(), 2);
        assert_eq!(store.subject_predicates(Some(&bob)).unwrap().len(), 2);
        assert_eq!(store.predicate_objects(Some(&iri("Alice"))).unwrap().len(), 2);
        assert!(store.contains(&TriplePattern::any().with_object(iri("Tea"))).unwrap());
    }

    #[test]
    fn test_transitive_walks() {
        let mut store = open_memory();
        // pump -> unit -> plant, with a cycle plant -> pump
        store.add(&triple("pump", "partOf", "unit")).unwrap();
        store.add(&triple("unit", "partOf", "plant")).unwrap();
        store.add(&triple("plant", "partOf", "pump")).unwrap();
        store.add(&triple("valve", "partOf", "unit")).unwrap();

        let part_of = iri("partOf");
        let up = store.transitive_objects(&iri("valve"), &part_of).unwrap();
        assert_eq!(up, vec![iri("valve"), iri("unit"), iri("plant"), iri("pump")]);

        let down = store.transitive_subjects(&part_of, &iri("unit")).unwrap();
        assert_eq!(down[0], iri("unit"));
        assert_eq!(down.len(), 4);
    }

    #[test]
    fn test_bind_and_qname() {
        let mut store = open_memory();
        store.bind("foaf", FOAF, true).unwrap();
        store.bind("foaf", "http://elsewhere/", false).unwrap();
        assert_eq!(store.namespaces().unwrap().get("foaf"), Some(FOAF));

        let qname = store.compute_qname(&format!("{}knows", FOAF)).unwrap();
        assert_eq!(qname.to_string(), "foaf:knows");

        let generated = store.compute_qname("http://unbound.org/vocab#thing").unwrap();
        assert_eq!(generated.prefix, "ns1");
        assert_eq!(store.namespaces().unwrap().get("ns1"), Some("http://unbound.org/vocab#"));

        assert!(store.compute_qname("http://unbound.org/").is_err());
    }

    #[test]
    fn test_query_view_and_bindings() {
        let mut store = open_memory();
        store.add(&triple("Alice", "knows", "Bob")).unwrap();
        store.add(&triple("Carol", "knows", "Bob")).unwrap();

        let rows = store
            .query(
                "SELECT subject, COUNT(*) AS n FROM graph WHERE object = :o GROUP BY subject ORDER BY subject",
                &[("o", iri("Bob"))],
            )
            .unwrap();
        assert_eq!(rows.columns, vec!["subject", "n"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[0][0], Some(iri("Alice")));
        assert_eq!(
            rows.rows[0][1],
            Some(Term::Literal(Literal::typed("1", format!("{}integer", XSD))))
        );
    }

    #[test]
    fn test_query_rejects_writes() {
        let store = open_memory();
        let err = store.query("DELETE FROM graph", &[]).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert!(matches!(store.query("SELEKT nonsense", &[]), Err(Error::Query(_))));
        assert!(matches!(
            store.query("SELECT * FROM graph", &[("missing", iri("x"))]),
            Err(Error::Query(_))
        ));
    }

    #[test]
    fn test_destroy_drops_schema() {
        let mut store = open_memory();
        store.add(&triple("Alice", "knows", "Bob")).unwrap();
        store.destroy(GRAPH).unwrap();
        assert!(!store.is_open());
        assert!(matches!(store.open(IN_MEMORY_URI, false), Err(Error::SchemaMissing { .. })));
        store.open(IN_MEMORY_URI, true).unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onto.db");
        let uri = format!("{}{}", FILE_URI_PREFIX, path.display());

        let mut store = SqliteGraphStore::new(GRAPH);
        assert!(matches!(store.open(&uri, false), Err(Error::SchemaMissing { .. })));

        store.open(&uri, true).unwrap();
        store.add(&triple("Alice", "knows", "Bob")).unwrap();
        store.close().unwrap();

        let mut reopened = SqliteGraphStore::new(GRAPH);
        reopened.open(&uri, false).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);

        let mut other_graph = SqliteGraphStore::new("http://example.org/other");
        assert!(matches!(other_graph.open(&uri, false), Err(Error::SchemaMissing { .. })));
    }
}
