//! Database schema definitions
//!
//! Every graph identifier gets its own pair of tables, named after a short
//! blake3 digest of the identifier so that several ontologies can share one
//! database file:
//! - `kb_<digest>_quads(subject, predicate, object, context)`
//! - `kb_<digest>_namespaces(prefix, uri)`

/// Table names for one graph identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub quads: String,
    pub namespaces: String,
}

impl TableNames {
    pub fn for_identifier(identifier: &str) -> Self {
        let digest = blake3::hash(identifier.as_bytes());
        let prefix = format!("kb_{}", &digest.to_hex().as_str()[..10]);
        Self {
            quads: format!("{}_quads", prefix),
            namespaces: format!("{}_namespaces", prefix),
        }
    }

    /// All schema creation statements
    pub fn create_statements(&self) -> Vec<String> {
        vec![
            format!(
                r#"
CREATE TABLE IF NOT EXISTS {quads} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object TEXT NOT NULL,
    context TEXT NOT NULL,
    UNIQUE(subject, predicate, object, context)
)
"#,
                quads = self.quads
            ),
            format!(
                r#"
CREATE TABLE IF NOT EXISTS {namespaces} (
    prefix TEXT PRIMARY KEY,
    uri TEXT NOT NULL
)
"#,
                namespaces = self.namespaces
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{quads}_subject ON {quads}(context, subject)",
                quads = self.quads
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{quads}_predicate ON {quads}(context, predicate)",
                quads = self.quads
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{quads}_object ON {quads}(context, object)",
                quads = self.quads
            ),
        ]
    }

    pub fn drop_statements(&self) -> Vec<String> {
        vec![
            format!("DROP TABLE IF EXISTS {}", self.quads),
            format!("DROP TABLE IF EXISTS {}", self.namespaces),
        ]
    }

    /// Temporary `graph(subject, predicate, object)` view scoped to one context
    pub fn graph_view_statements(&self, context: &str) -> Vec<String> {
        vec![
            "DROP VIEW IF EXISTS temp.graph".to_string(),
            format!(
                "CREATE TEMP VIEW graph AS SELECT subject, predicate, object FROM {} WHERE context = {}",
                self.quads,
                sql_string(context)
            ),
        ]
    }
}

/// Quote a value as an SQL string literal
fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
