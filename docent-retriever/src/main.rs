use anyhow::Context;
use clap::{Parser, Subcommand};
use docent_context::markdown::parse_header;
use docent_retriever::config::CONFIG_FILE;
use docent_retriever::{EngineConfig, IndexingEngine};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Index Markdown documentation into a section hierarchy and search it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory holding the .docent.db database and docent.toml
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Configuration file (defaults to docent.toml in the base directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and register the embedding model
    Init {
        /// Also write the effective configuration to docent.toml
        #[arg(long)]
        write_config: bool,
    },
    /// Add a Markdown file as a new document
    Add {
        file: PathBuf,
        /// Document title (defaults to the first header, then the file name)
        #[arg(short, long)]
        title: Option<String>,
        /// Logical path recorded for the document (defaults to the file path)
        #[arg(short, long)]
        path: Option<String>,
    },
    /// Replace a document's content with a file and re-index it
    Update {
        id: i64,
        file: PathBuf,
        /// Recorded in the document history
        #[arg(long)]
        changed_by: Option<String>,
    },
    /// Rebuild a document's hierarchy from its stored content
    Reindex { id: i64 },
    /// Recompute a document's relationship edges
    Link { id: i64 },
    /// Delete a document and everything derived from it
    Delete { id: i64 },
    /// List documents
    List {
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Search the index
    Search {
        query: String,
        /// Maximum number of results (defaults to search.default_limit)
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show a document's section tree
    Structure {
        id: i64,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Export a document's nodes and edges as JSON
    Graph { id: i64 },
    /// Show a document's previous versions
    History {
        id: i64,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show index statistics
    Stats {
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct DocumentSummary {
    id: i64,
    title: String,
    path: String,
    version: i64,
    updated_at: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_markdown(file: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))
}

fn default_title(content: &str, file: &Path) -> String {
    content
        .lines()
        .find_map(parse_header)
        .map(|(_, title)| title.to_string())
        .or_else(|| file.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "Untitled".to_string())
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::discover(&args.base_dir)?,
    };
    let engine = IndexingEngine::open(config, &args.base_dir).await?;

    match args.command {
        Commands::Init { write_config } => {
            let path = engine.config().database_path(&args.base_dir);
            println!("Initialized index at {}", path.display());
            println!(
                "Embedding model: {} ({} dimensions)",
                engine.adapter().model_id(),
                engine.adapter().dimension()
            );
            if write_config {
                let config_path = args.base_dir.join(CONFIG_FILE);
                if config_path.exists() {
                    println!("{} already exists, leaving it alone", config_path.display());
                } else {
                    std::fs::write(&config_path, engine.config().to_toml_string()?)?;
                    println!("Wrote {}", config_path.display());
                }
            }
            Ok(())
        }
        Commands::Add { file, title, path } => {
            let content = read_markdown(&file)?;
            let title = title.unwrap_or_else(|| default_title(&content, &file));
            let path = path.unwrap_or_else(|| file.display().to_string());
            let document = engine.create_document(&title, &path, &content).await?;
            println!("Added document {} '{}'", document.id, document.title);
            Ok(())
        }
        Commands::Update {
            id,
            file,
            changed_by,
        } => {
            let content = read_markdown(&file)?;
            let document = engine
                .update_document(id, &content, changed_by.as_deref())
                .await?;
            println!("Updated document {} to version {}", document.id, document.version);
            Ok(())
        }
        Commands::Reindex { id } => {
            let report = engine.reindex_document(id).await?;
            println!(
                "Reindexed document {}: {} nodes, {} edges, {} keywords",
                report.document_id, report.nodes, report.edges, report.keywords
            );
            Ok(())
        }
        Commands::Link { id } => {
            let edges = engine.link_document(id).await?;
            println!("Linked document {id}: {edges} edges");
            Ok(())
        }
        Commands::Delete { id } => {
            engine.delete_document(id).await?;
            println!("Deleted document {id}");
            Ok(())
        }
        Commands::List { format } => {
            let documents = engine.list_documents().await?;
            match format {
                OutputFormat::Json => {
                    let summaries: Vec<DocumentSummary> = documents
                        .into_iter()
                        .map(|d| DocumentSummary {
                            id: d.id,
                            title: d.title,
                            path: d.path,
                            version: d.version,
                            updated_at: d.updated_at.to_rfc3339(),
                        })
                        .collect();
                    print_json(&summaries)?;
                }
                OutputFormat::Summary => {
                    if documents.is_empty() {
                        println!("No documents indexed");
                    }
                    for d in documents {
                        println!("{:>4}  v{:<3} {}  ({})", d.id, d.version, d.title, d.path);
                    }
                }
            }
            Ok(())
        }
        Commands::Search {
            query,
            limit,
            format,
        } => {
            let limit = limit.unwrap_or(engine.config().search.default_limit);
            let results = engine.search(&query, limit).await?;
            match format {
                OutputFormat::Json => print_json(&results)?,
                OutputFormat::Summary => {
                    if results.is_empty() {
                        println!("No results for '{query}'");
                    }
                    for (rank, r) in results.iter().enumerate() {
                        println!(
                            "{}. [{:>5.1}%] {} ({}, {})",
                            rank + 1,
                            r.relevance_percent(),
                            r.title,
                            r.match_type,
                            r.document_title
                        );
                        println!("   {}", r.preview(120).replace('\n', " "));
                    }
                }
            }
            Ok(())
        }
        Commands::Structure { id, format } => {
            let structure = engine.get_structure(id).await?;
            match format {
                OutputFormat::Json => print_json(&structure)?,
                OutputFormat::Summary => {
                    println!("{} ({})", structure.title, structure.path);
                    print!("{}", structure.outline());
                }
            }
            Ok(())
        }
        Commands::Graph { id } => {
            let graph = engine.get_graph(id).await?;
            print_json(&graph)
        }
        Commands::History { id, format } => {
            let history = engine.document_history(id).await?;
            match format {
                OutputFormat::Json => print_json(&history)?,
                OutputFormat::Summary => {
                    if history.is_empty() {
                        println!("Document {id} has no previous versions");
                    }
                    for entry in history {
                        println!(
                            "v{}  {}  {}",
                            entry.version,
                            entry.changed_at.to_rfc3339(),
                            entry.changed_by.as_deref().unwrap_or("-")
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Stats { format } => {
            let stats = engine.stats().await?;
            match format {
                OutputFormat::Json => print_json(&stats)?,
                OutputFormat::Summary => {
                    println!("Documents:  {}", stats.index.documents_count);
                    println!("Nodes:      {}", stats.index.nodes_count);
                    println!("Edges:      {}", stats.index.edges_count);
                    println!("Keywords:   {}", stats.index.keywords_count);
                    println!("Models:     {}", stats.index.models_count);
                    println!("Model:      {} ({} dimensions)", stats.model_id, stats.dimension);
                }
            }
            Ok(())
        }
    }
}
