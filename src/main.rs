//! # finreport CLI (`finr`)
//!
//! ## Usage
//!
//! ```bash
//! finr --config ./config/finreport.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `finr init` | Create the SQLite database and run schema migrations |
//! | `finr upload <path>` | Store and index a file |
//! | `finr list` | List uploaded documents |
//! | `finr delete <id>` | Delete a document with its blob and vectors |
//! | `finr reprocess <id>` | Re-index a document |
//! | `finr search "<query>"` | Keyword, semantic or hybrid search |
//! | `finr select "<context>"` | Auto-select documents for a context |
//! | `finr report generate <ids..>` | Generate a financial statement report |
//! | `finr report status <id>` | Show a report job |
//! | `finr report download <id>` | Write a finished report to disk |
//! | `finr report list` | List report jobs |
//! | `finr chat "<message>"` | Send one chat message |
//! | `finr templates` | List report templates |
//! | `finr serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! finr init
//! finr upload ./statements/2023.xlsx
//! finr search "operating cash flow" --mode keyword
//! finr report generate 3f1c... --template executive --wait
//! finr report download <report-id> --output report.md
//! finr serve
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use finreport::app::App;
use finreport::config;
use finreport::logging::init_tracing;
use finreport::server;
use finreport_core::models::{
    Document, DocumentCategory, DocumentFilter, Principal, ReportFormat, ReportJob, SearchMode,
    Template,
};
use finreport_core::search::SelectionPrefs;

/// finreport: upload financial spreadsheets, search them, and generate
/// financial statement reports with an LLM.
#[derive(Parser)]
#[command(name = "finr", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/finreport.toml")]
    config: PathBuf,

    /// Principal that owns uploads and reports.
    #[arg(long, global = true, default_value = "local")]
    principal: String,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Upload a file and wait for indexing to finish.
    Upload {
        path: PathBuf,
        /// Return as soon as the file is stored.
        #[arg(long)]
        no_wait: bool,
    },

    /// List documents.
    List {
        /// Substring over filename and content preview.
        #[arg(long)]
        search: Option<String>,
        /// Restrict to a category (excel, csv, pdf, other).
        #[arg(long)]
        category: Vec<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Delete a document, its blob and its vectors.
    Delete { id: String },

    /// Re-index a document from its stored bytes.
    Reprocess { id: String },

    /// Search documents.
    Search {
        query: String,
        /// keyword, semantic or hybrid (default depends on embeddings).
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        category: Vec<String>,
    },

    /// Pick the documents most relevant to a context.
    Select {
        context: String,
        #[arg(long, default_value = "3")]
        max: usize,
    },

    /// Report jobs.
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Send one chat message.
    Chat {
        message: String,
        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,
        /// Select these document ids for the session.
        #[arg(long = "file")]
        files: Vec<String>,
    },

    /// List report templates.
    Templates,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum ReportAction {
    /// Queue a report over one or more documents.
    Generate {
        #[arg(required = true)]
        document_ids: Vec<String>,
        #[arg(long)]
        template: Option<String>,
        /// markdown, json or xlsx.
        #[arg(long, default_value = "markdown")]
        format: String,
        /// Wait for the job to finish.
        #[arg(long)]
        wait: bool,
    },
    /// Show a report job.
    Status { id: String },
    /// Write a completed report to a file (stdout when omitted).
    Download {
        id: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List report jobs.
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Commands::Templates = cli.command {
        for t in Template::ALL {
            println!("{:<14} {}", t.as_str(), t.description());
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Serve = cli.command {
        return server::run_server(cfg).await;
    }

    let principal = Principal::new(cli.principal.clone());
    let app = App::init(cfg).await?;
    let result = run(&app, &principal, cli.command).await;
    app.shutdown().await;
    result
}

async fn run(app: &App, principal: &Principal, command: Commands) -> anyhow::Result<()> {
    let services = &app.services;
    match command {
        Commands::Init => {
            println!("Database initialized at {}.", app.config.db.path.display());
        }
        Commands::Upload { path, no_wait } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .context("path has no file name")?;
            let doc = services.pipeline.upload(principal, filename, bytes).await?;
            if no_wait {
                print_document(&doc);
            } else {
                services.pipeline.drain().await;
                print_document(&services.registry.get(&doc.id).await?);
            }
        }
        Commands::List {
            search,
            category,
            limit,
            offset,
        } => {
            let filter = DocumentFilter {
                search,
                categories: parse_categories(&category)?,
                ..DocumentFilter::page(limit, offset)
            };
            let docs = services.search.available(principal, filter).await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in &docs {
                print_document(doc);
            }
        }
        Commands::Delete { id } => {
            services.registry.get_owned(principal, &id).await?;
            services.registry.delete(&id).await?;
            println!("Deleted {}.", id);
        }
        Commands::Reprocess { id } => {
            services.registry.get_owned(principal, &id).await?;
            services.pipeline.reprocess(&id).await?;
            services.pipeline.drain().await;
            print_document(&services.registry.get(&id).await?);
        }
        Commands::Search {
            query,
            mode,
            limit,
            category,
        } => {
            let mode = match mode {
                Some(m) => m.parse::<SearchMode>()?,
                None => services.search.default_mode(),
            };
            let results = services
                .search
                .search(principal, &query, mode, limit, &parse_categories(&category)?)
                .await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!("{}. [{:.2}] {} ({})", i + 1, r.score, r.filename, r.document_id);
                if let Some(ref excerpt) = r.excerpt {
                    println!("    {}", excerpt.replace('\n', " "));
                }
            }
        }
        Commands::Select { context, max } => {
            let docs = services
                .search
                .auto_select(principal, &context, max, SelectionPrefs::default())
                .await?;
            for doc in &docs {
                print_document(doc);
            }
        }
        Commands::Report { action } => run_report(app, principal, action).await?,
        Commands::Chat {
            message,
            session,
            files,
        } => {
            let reply = services
                .chat
                .submit(principal, session.as_deref(), &message, &files)
                .await?;
            println!("{}", reply.reply);
            println!();
            println!("session: {}  intent: {}", reply.session_id, reply.intent.as_str());
            if let Some(ref report_id) = reply.report_id {
                println!("report: {}", report_id);
            }
        }
        Commands::Templates | Commands::Serve => {}
    }
    Ok(())
}

async fn run_report(app: &App, principal: &Principal, action: ReportAction) -> anyhow::Result<()> {
    let reports = &app.services.reports;
    match action {
        ReportAction::Generate {
            document_ids,
            template,
            format,
            wait,
        } => {
            let template = match template {
                Some(t) => t.parse::<Template>()?,
                None => app.services.default_template,
            };
            let format = format.parse::<ReportFormat>()?;
            let job = reports
                .generate(principal, &document_ids, template, format)
                .await?;
            if wait {
                reports.drain().await;
                print_report(&reports.get_status(principal, &job.id).await?);
            } else {
                print_report(&job);
            }
        }
        ReportAction::Status { id } => {
            print_report(&reports.get_status(principal, &id).await?);
        }
        ReportAction::Download { id, output } => {
            let artifact = reports.download(principal, &id).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &artifact.bytes)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote {} ({} bytes).", path.display(), artifact.bytes.len());
                }
                None if artifact.format.is_binary() => {
                    anyhow::bail!(
                        "{} is a binary artifact; pass --output to save it",
                        artifact.filename
                    );
                }
                None => println!("{}", String::from_utf8_lossy(&artifact.bytes)),
            }
        }
        ReportAction::List { limit } => {
            let jobs = reports.list(principal, limit, 0).await?;
            if jobs.is_empty() {
                println!("No reports.");
            }
            for job in &jobs {
                print_report(job);
            }
        }
    }
    Ok(())
}

fn parse_categories(raw: &[String]) -> anyhow::Result<Vec<DocumentCategory>> {
    raw.iter()
        .map(|c| c.parse::<DocumentCategory>().map_err(anyhow::Error::from))
        .collect()
}

fn print_document(doc: &Document) {
    println!(
        "{}  {:<10} {:<8} {:>9}  {}",
        doc.id,
        doc.vector_status.as_str(),
        doc.category.as_str(),
        doc.size_bytes,
        doc.filename
    );
    if let Some(ref err) = doc.error_message {
        println!("    error: {}", err);
    }
}

fn print_report(job: &ReportJob) {
    let progress = job
        .progress
        .map(|p| format!(" {}%", p))
        .unwrap_or_default();
    println!(
        "{}  {}{}  {} ({}) over {} document(s), created {}",
        job.id,
        job.status,
        progress,
        job.template.as_str(),
        job.format.as_str(),
        job.document_ids.len(),
        job.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(ref err) = job.error_message {
        println!("    error: {}", err);
    }
}

