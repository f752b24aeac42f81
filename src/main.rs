//! Ontolink CLI - administer an ontology database through the resilient proxy

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use ontolink::{ConnectionConfig, ResilientStore, TriplePattern};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ontolink")]
#[command(version = "0.0.1")]
#[command(about = "Fault-tolerant access to an ontology stored in a graph database")]
#[command(long_about = r#"
Ontolink connects to the graph database holding one ontology and keeps the
connection alive across server-side timeouts.

Example usage:
  ontolink --config ontology.yaml init
  ontolink --config ontology.yaml merge --file people.nt
  ontolink --config ontology.yaml query --sql "SELECT subject FROM graph"
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (YAML, JSON or TOML); defaults apply without it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database user
    #[arg(short, long, global = true)]
    username: Option<String>,

    /// Database password
    #[arg(short, long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the connection target, its unique id and namespaces
    Show,

    /// Create the schema for this ontology if it does not exist
    Init,

    /// Count the triples stored for this ontology
    Stats,

    /// Merge an N-Triples file into the ontology
    Merge {
        /// Path to the .nt file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print every triple as N-Triples
    Dump,

    /// Run a read-only SQL query against the `graph(subject, predicate, object)` view
    Query {
        /// Query text
        #[arg(short, long)]
        sql: String,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Irreversibly delete the ontology's data
    Destroy {
        /// Confirmation phrase
        #[arg(long)]
        confirm: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    run(cli)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConnectionConfig::factory(cli.config)?;

    if let Commands::Show = cli.command {
        println!("{}", config);
        println!("unique id: {}", config.unique_id());
        return Ok(());
    }

    let mut store = ResilientStore::new(config);
    let create = matches!(cli.command, Commands::Init);
    store.setup(create, cli.username.as_deref(), cli.password.as_deref())?;

    match cli.command {
        Commands::Show => {}

        Commands::Init => {
            let count = store.len()?;
            println!("Initialised graph {} ({} triples)", store.identifier(), count);
        }

        Commands::Stats => {
            let namespaces = store.namespaces()?;
            println!("graph: {}", store.identifier());
            println!("triples: {}", store.len()?);
            println!("namespaces: {}", namespaces.len());
        }

        Commands::Merge { file } => {
            tracing::info!("Merging {} into {}", file.display(), store.identifier());
            let merged = store.merge_file_into_db(&file)?;
            println!("Merged {} triples from {}", merged, file.display());
        }

        Commands::Dump => {
            for triple in store.triples(&TriplePattern::any())? {
                println!("{}", triple);
            }
        }

        Commands::Query { sql, json } => {
            let rows = store.query(&sql, &[])?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{}", rows.columns.join("\t"));
                for row in rows {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|cell| cell.as_ref().map(|t| t.to_string()).unwrap_or_default())
                        .collect();
                    println!("{}", cells.join("\t"));
                }
            }
        }

        Commands::Destroy { confirm } => {
            store.destroy(&confirm)?;
            println!("Destroyed graph {}", store.identifier());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn file_config(dir: &Path) -> PathBuf {
        let path = dir.join("onto.yaml");
        let database = dir.join("onto.db");
        std::fs::write(
            &path,
            format!("dialect: sqlite\ndatabase: '{}'\nbaseURL: http://example.org/cli\n", database.display()),
        )
        .unwrap();
        path
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ontolink").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_init_then_merge_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(dir.path());
        let config = config.to_str().unwrap();
        let source = dir.path().join("people.nt");
        std::fs::write(&source, "<http://ex/Alice> <http://ex/knows> <http://ex/Bob> .\n").unwrap();

        run(cli(&["--config", config, "init"])).unwrap();
        run(cli(&["--config", config, "merge", "--file", source.to_str().unwrap()])).unwrap();
        run(cli(&["--config", config, "stats"])).unwrap();
        run(cli(&["--config", config, "dump"])).unwrap();
        run(cli(&["--config", config, "query", "--sql", "SELECT subject FROM graph", "--json"])).unwrap();

        let mut store = ResilientStore::from_source(PathBuf::from(config)).unwrap();
        store.setup(false, None, None).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_stats_without_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(dir.path());
        assert!(run(cli(&["--config", config.to_str().unwrap(), "stats"])).is_err());
    }

    #[test]
    fn test_destroy_needs_phrase() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(dir.path());
        let config = config.to_str().unwrap();
        run(cli(&["--config", config, "init"])).unwrap();
        assert!(run(cli(&["--config", config, "destroy", "--confirm", "yes"])).is_err());
        run(cli(&["--config", config, "destroy", "--confirm", "I know what I am doing"])).unwrap();
        assert!(run(cli(&["--config", config, "stats"])).is_err());
    }
}
