//! shastra-indexer - 经书 PDF 索引工具

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use shastra_indexer_lib::config::StoreKind;
use shastra_indexer_lib::import_queue::{process_directory, ImportStatus};
use shastra_indexer_lib::index::{default_schema, SearchFilters};
use shastra_indexer_lib::{
    logging, BookParser, ImportOptions, ImportPipeline, IndexDocumentBuilder, MarkerDirStore, OpenSearchClient,
    PipelineConfig, PipelineError, ProcessedStore, SearchIndex, SearchQuery, SqliteStore,
};

#[derive(Parser)]
#[command(name = "shastra-indexer")]
#[command(version, about = "Devotional PDF extraction, segmentation and search indexing", long_about = None)]
#[command(after_help = "EXAMPLES:
    shastra-indexer setup                       Create the search index
    shastra-indexer process                     Index every PDF in the configured directory
    shastra-indexer process book.pdf --force    Re-index one book
    shastra-indexer search \"holy name\" -n 5     Search indexed paragraphs")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the index with the bundled settings and mappings
    Setup,
    /// Process a PDF file or every PDF in a directory
    Process {
        /// PDF file or directory (defaults to the configured PDF directory)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
        /// Reprocess documents that were already indexed
        #[arg(short, long)]
        force: bool,
        /// Password for encrypted PDFs
        #[arg(long)]
        password: Option<String>,
    },
    /// Search indexed paragraphs
    Search {
        query: String,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        book: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(short = 'n', long, default_value_t = 10)]
        size: usize,
    },
    /// Show per-book document counts and cluster health
    Stats,
    /// Delete every document of a book and its processed records
    Delete {
        /// Exact book title
        title: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, PipelineError> {
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Setup => setup(&config),
        Command::Process { path, force, password } => {
            let options = ImportOptions {
                force: *force,
                password: password.clone(),
            };
            process(&config, path.as_deref(), options)
        }
        Command::Search {
            query,
            author,
            language,
            book,
            tags,
            size,
        } => {
            let filters = SearchFilters {
                author: author.clone(),
                language: language.clone(),
                book_title: book.clone(),
                tags: tags.clone(),
            };
            search(&config, SearchQuery::new(query.as_str()).with_size(*size).with_filters(filters))
        }
        Command::Stats => stats(&config),
        Command::Delete { title } => delete(&config, title),
    }
}

fn open_store(config: &PipelineConfig) -> Result<Box<dyn ProcessedStore>, PipelineError> {
    let dir = &config.batch.processed_dir;
    Ok(match config.batch.store {
        StoreKind::Marker => Box::new(MarkerDirStore::new(dir.clone())),
        StoreKind::Sqlite => Box::new(SqliteStore::open(dir.join("processed.db"))?),
    })
}

fn setup(config: &PipelineConfig) -> Result<ExitCode, PipelineError> {
    let client = OpenSearchClient::new(&config.index)?;
    if client.create_index(&default_schema())? {
        println!("Created index {}", client.index_name());
    } else {
        println!("Index {} already exists", client.index_name());
    }
    Ok(ExitCode::SUCCESS)
}

fn process(config: &PipelineConfig, path: Option<&Path>, options: ImportOptions) -> Result<ExitCode, PipelineError> {
    let parser = BookParser::from_config(config)?;
    let builder = IndexDocumentBuilder::new(Arc::clone(parser.normalizer()), &config.index);
    let client = OpenSearchClient::new(&config.index)?;
    let store = open_store(config)?;

    let health = client.health_check()?;
    if !health.index_exists {
        client.create_index(&default_schema())?;
    }

    let pipeline = ImportPipeline::new(&parser, &builder, &client, &*store).with_options(options);
    let target = path.unwrap_or(config.batch.pdf_dir.as_path());

    if target.is_file() {
        return Ok(match pipeline.process(target) {
            ImportStatus::Completed { documents, failed } => {
                println!("Indexed {} documents from {} ({} failed)", documents, target.display(), failed);
                ExitCode::SUCCESS
            }
            ImportStatus::Skipped => {
                println!("Skipped {} (already processed)", target.display());
                ExitCode::SUCCESS
            }
            ImportStatus::Failed { error } => {
                eprintln!("Failed to process {}: {}", target.display(), error);
                ExitCode::FAILURE
            }
            ImportStatus::Pending => ExitCode::FAILURE,
        });
    }

    let report = process_directory(target, &pipeline, config.batch.max_concurrent)?;
    println!(
        "Processed {} files: {} successful, {} failed, {} skipped",
        report.total(),
        report.successful,
        report.failed,
        report.skipped
    );
    for task in &report.tasks {
        if let ImportStatus::Failed { error } = &task.status {
            println!("  {}: {}", task.file_path.display(), error);
        }
    }

    Ok(if report.failed > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn search(config: &PipelineConfig, query: SearchQuery) -> Result<ExitCode, PipelineError> {
    let client = OpenSearchClient::new(&config.index)?;
    let results = client.search(&query)?;

    println!("{} hits", results.total_hits);
    for (i, hit) in results.hits.iter().enumerate() {
        println!();
        println!("{}. {} / {} (p. {}, score {:.2})", i + 1, hit.book_title, hit.chapter_title, hit.page_number, hit.score);
        println!("   {}", hit.author);
        if !hit.tags.is_empty() {
            println!("   tags: {}", hit.tags.join(", "));
        }
        match hit.highlights.first() {
            Some(highlight) => println!("   {}", highlight),
            None => println!("   {}", hit.content),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn stats(config: &PipelineConfig) -> Result<ExitCode, PipelineError> {
    let client = OpenSearchClient::new(&config.index)?;
    let health = client.health_check()?;
    println!("Cluster: {} ({})", health.cluster_name, health.cluster_status);

    if !health.index_exists {
        println!("Index {} does not exist, run `setup` first", client.index_name());
        return Ok(ExitCode::SUCCESS);
    }

    let stats = client.book_stats()?;
    println!("Documents: {}", stats.total_documents);
    println!("Books: {}", stats.books.len());
    for (title, count) in &stats.books {
        println!("  {title}: {count}");
    }
    if !stats.authors.is_empty() {
        println!("Authors: {}", stats.authors.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn delete(config: &PipelineConfig, title: &str) -> Result<ExitCode, PipelineError> {
    let client = OpenSearchClient::new(&config.index)?;
    let store = open_store(config)?;

    let deleted = client.delete_by_field("book_title.keyword", title)?;
    let forgotten = store.forget_title(title)?;
    println!("Deleted {} documents of {:?}, cleared {} processed records", deleted, title, forgotten);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_process_args() {
        let cli = Cli::try_parse_from(["shastra-indexer", "-vv", "process", "book.pdf", "--force"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Process { path, force, password } => {
                assert_eq!(path, Some(PathBuf::from("book.pdf")));
                assert!(force);
                assert!(password.is_none());
            }
            _ => panic!("expected process command"),
        }
    }

    #[test]
    fn test_parse_search_filters() {
        let cli = Cli::try_parse_from([
            "shastra-indexer",
            "search",
            "holy name",
            "--author",
            "Srila Narayan Maharaj",
            "--tag",
            "kirtan",
            "--tag",
            "bhakti",
            "-n",
            "3",
        ])
        .unwrap();
        match cli.command {
            Command::Search { query, author, tags, size, .. } => {
                assert_eq!(query, "holy name");
                assert_eq!(author.as_deref(), Some("Srila Narayan Maharaj"));
                assert_eq!(tags, vec!["kirtan", "bhakti"]);
                assert_eq!(size, 3);
            }
            _ => panic!("expected search command"),
        }
    }
}
