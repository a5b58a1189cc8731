//! # finrag CLI
//!
//! The `finrag` binary indexes PDF filings and answers questions about them.
//!
//! ## Usage
//!
//! ```bash
//! finrag --config ./config/finrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `finrag index` | Build an index from PDFs and save it |
//! | `finrag ask "<question>"` | Answer one question and exit |
//! | `finrag chat` | Interactive question loop on stdin |
//! | `finrag serve` | Start the HTTP server |
//! | `finrag tools` | List the tools available to the agent |
//!
//! ## Examples
//!
//! ```bash
//! # One-shot question over a filing
//! finrag ask --file ./filings/10k-2023.pdf "What was the revenue in 2023?"
//!
//! # Index a directory once, then chat against the saved index
//! finrag index --dir ./filings --out ./data/index.json
//! finrag chat --index ./data/index.json
//! ```
//!
//! Answers go to stdout; logs and progress go to stderr.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use finrag::agent::AgentAction;
use finrag::config::{load_config_or_default, Config};
use finrag::embedding::create_embedder;
use finrag::index::VectorIndex;
use finrag::ingest::{build_index, read_documents, IngestOptions};
use finrag::llm::DisabledModel;
use finrag::session::{Backends, IndexStatus, Session};
use finrag::tools::ToolRegistry;

/// finrag: ask questions about financial PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/finrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "finrag",
    about = "finrag: a retrieval-augmented chat assistant for financial documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/finrag.toml`. Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/finrag.toml")]
    config: PathBuf,

    /// Log agent steps and retrieval details to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the documents for a command come from.
#[derive(Args, Clone)]
struct DocumentArgs {
    /// PDF file to load. Repeat for several files.
    #[arg(long = "file")]
    files: Vec<PathBuf>,

    /// Directory to search recursively for `*.pdf` files.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Pre-built index to load instead of reading PDFs.
    #[arg(long, conflicts_with_all = ["files", "dir"])]
    index: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from PDF files and save it as JSON.
    Index {
        /// PDF file to index. Repeat for several files.
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Directory to search recursively for `*.pdf` files.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Where to write the index.
        #[arg(long)]
        out: PathBuf,
    },

    /// Answer a single question and exit.
    Ask {
        #[command(flatten)]
        docs: DocumentArgs,

        /// The question to answer.
        question: String,
    },

    /// Interactive chat. `:history` prints the conversation, `:quit` exits.
    Chat {
        #[command(flatten)]
        docs: DocumentArgs,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// List the tools the agent can call.
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    finrag::logging::init(cli.verbose);

    let config = load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Index { files, dir, out } => {
            run_index(&config, &files, dir.as_deref(), &out).await?;
        }
        Commands::Ask { docs, question } => {
            let session = open_session(&config, &docs).await?;
            let reply = session.ask(&question).await;
            if cli.verbose {
                print_steps(&reply.steps);
            }
            println!("{}", reply.text);
        }
        Commands::Chat { docs } => {
            let session = open_session(&config, &docs).await?;
            run_chat(&session, cli.verbose).await?;
        }
        Commands::Serve => {
            finrag::server::run_server(&config).await?;
        }
        Commands::Tools => {
            list_tools(&config)?;
        }
    }

    Ok(())
}

async fn run_index(
    config: &Config,
    files: &[PathBuf],
    dir: Option<&Path>,
    out: &Path,
) -> Result<()> {
    let docs = read_documents(files, dir)?;
    if docs.is_empty() {
        bail!("No documents given. Use --file or --dir.");
    }

    let embedder = create_embedder(&config.embedding)?;
    eprintln!("Indexing {} document(s)...", docs.len());
    let index = build_index(&docs, &IngestOptions::from_config(config), embedder.as_ref()).await?;
    index.save(out)?;

    println!(
        "Indexed {} chunk(s) from {} document(s) into {}",
        index.len(),
        docs.len(),
        out.display()
    );
    Ok(())
}

/// Create a session and load documents into it from whichever source the
/// arguments (or `[index].path`) name.
async fn open_session(config: &Config, args: &DocumentArgs) -> Result<Session> {
    let backends = Backends::from_config(config)?;
    let session = Session::new(Arc::new(config.clone()), backends);

    let index_path = args.index.as_ref().or(config.index.path.as_ref());
    let status = if args.files.is_empty() && args.dir.is_none() {
        match index_path {
            Some(path) => {
                let index = VectorIndex::load(path)
                    .with_context(|| format!("Failed to load index: {}", path.display()))?;
                session.load_index(index).await?
            }
            None => return Ok(session),
        }
    } else {
        let docs = read_documents(&args.files, args.dir.as_deref())?;
        eprintln!("Indexing {} document(s)...", docs.len());
        session.set_documents(docs).await?
    };

    match status {
        IndexStatus::Rebuilt { chunks } | IndexStatus::Loaded { chunks } => {
            eprintln!("Ready: {} chunk(s) indexed.", chunks);
        }
        IndexStatus::Unchanged | IndexStatus::Cleared => {}
    }
    Ok(session)
}

async fn run_chat(session: &Session, verbose: bool) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        eprint!("> ");
        std::io::stderr().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            ":quit" | ":q" => break,
            ":history" => {
                for message in session.history().await {
                    writeln!(stdout, "{}: {}", message.role, message.content)?;
                }
                continue;
            }
            _ => {}
        }

        let reply = session.ask(line).await;
        if verbose {
            print_steps(&reply.steps);
        }
        writeln!(stdout, "{}", reply.text)?;
        stdout.flush()?;
    }
    Ok(())
}

fn print_steps(steps: &[AgentAction]) {
    for (i, step) in steps.iter().enumerate() {
        eprintln!("[step {}] thought: {}", i + 1, step.thought);
        eprintln!("[step {}] {}({})", i + 1, step.tool, step.input);
        eprintln!("[step {}] observation: {}", i + 1, step.observation);
    }
}

fn list_tools(config: &Config) -> Result<()> {
    let empty = Arc::new(VectorIndex::new("", "", Vec::new(), Vec::new()));
    let embedder = create_embedder(&config.embedding)?;
    let registry = ToolRegistry::standard(config, empty, embedder, Arc::new(DisabledModel))?;

    for tool in registry.tools() {
        println!("{}\n    {}", tool.name(), tool.description());
    }
    Ok(())
}
