use anyhow::{Context, Result};
use chrono::Local;
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use papersum::config::{self, ConfigLocations};
use papersum::export::ExportFormat;
use papersum::pipeline::{collect_pdfs, ExportOptions, PaperSource, Pipeline};
use papersum::search::biorxiv::{
    self, BiorxivClient, Interval, PreprintServer, CATEGORIES, DEFAULT_BIORXIV_API,
};
use papersum::search::{self, ArxivClient, SortCriterion, DEFAULT_ARXIV_BASE};
use papersum::summary::budget::TokenBudget;
use papersum::summary::client::OpenAiClient;
use papersum::summary::credentials::ChatApiPool;
use papersum::summary::prompts::Language;
use papersum::summary::Summarizer;

/// Fetch papers from arXiv, bioRxiv or local PDFs and summarize them with a chat model
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize local PDFs, or papers fetched from arXiv with a query
    Paper(PaperArgs),
    /// Summarize recent bioRxiv or medRxiv preprints
    Biorxiv(BiorxivArgs),
    /// Create the config file, or set KEY=value pairs in it
    Config {
        /// e.g. OPENAI_API_KEY=sk-...
        #[arg(value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Export format: md, txt, pdf or tex
    #[arg(short = 'f', long, default_value = "md", value_parser = parse_format)]
    file_format: ExportFormat,

    /// Answer language: en or zh
    #[arg(short, long, default_value = "en")]
    language: Language,

    /// Directory receiving pdf_files/ and export/
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Summarize papers concurrently
    #[arg(long)]
    concurrent: bool,

    /// Config file to use instead of the default lookup
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra API key
    #[arg(long, env = "OPENAI_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(clap::Args)]
struct PaperArgs {
    /// A PDF file or a directory of PDFs; when absent papers come from arXiv
    #[arg(short, long)]
    pdf: Option<PathBuf>,

    /// arXiv query string: ti: xx, au: xx, all: xx
    #[arg(short, long, default_value = "all: ChatGPT robot")]
    query: String,

    /// Research field of the reader, used in the prompts
    #[arg(short, long, default_value = "reinforcement learning")]
    key_word: String,

    /// Words that must all appear in an abstract for the paper to be kept
    #[arg(long, num_args = 1..)]
    filter_keys: Vec<String>,

    /// Maximum number of arXiv results
    #[arg(short, long, default_value_t = 1)]
    max_results: usize,

    /// Relevance, LastUpdatedDate or SubmittedDate
    #[arg(short, long, default_value = "Relevance")]
    sort: SortCriterion,

    /// arXiv API host
    #[arg(long, default_value = DEFAULT_ARXIV_BASE)]
    arxiv_base: String,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(clap::Args)]
struct BiorxivArgs {
    /// Posting window as START:END, e.g. 2023-05-01:2023-05-03
    #[arg(long, conflicts_with = "days")]
    date: Option<Interval>,

    /// Posting window as the last N days
    #[arg(long, default_value_t = 2)]
    days: u32,

    /// biorxiv or medrxiv
    #[arg(long, default_value = "biorxiv")]
    server: PreprintServer,

    /// Maximum number of preprints
    #[arg(short, long, default_value_t = 20)]
    max_results: usize,

    /// Subject categories to keep; also the key words of the prompts
    #[arg(
        short,
        long,
        num_args = 1..,
        default_value = "bioinformatics",
        value_parser = PossibleValuesParser::new(CATEGORIES)
    )]
    category: Vec<String>,

    /// Words that must all appear in an abstract for the paper to be kept
    #[arg(long, num_args = 1..)]
    filter_keys: Vec<String>,

    /// bioRxiv API host
    #[arg(long, default_value = DEFAULT_BIORXIV_API)]
    biorxiv_api: String,

    /// Host serving the PDFs; defaults to the server's own site
    #[arg(long)]
    content_base: Option<String>,

    #[command(flatten)]
    output: OutputArgs,
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    s.parse().map_err(|e: papersum::PaperError| e.to_string())
}

/// Credentials, chat client and tokenizer, checked before any network search.
fn build_pipeline(output: &OutputArgs, key_words: &str) -> Result<Pipeline> {
    let locations = ConfigLocations::discover();
    let settings = config::load_settings(output.config.as_deref(), &locations)
        .context("Failed to load configuration")?;
    let pool = ChatApiPool::new(settings.api_keys(output.api_key.as_deref()))
        .context("No usable API keys")?;
    let provider = OpenAiClient::new(settings.api_base(), settings.model(), settings.timeout())
        .context("Failed to build chat client")?;
    let budget = TokenBudget::gpt2().context("Failed to load the GPT-2 tokenizer")?;

    info!("Key word: {}", key_words);
    let summarizer = Summarizer::new(Arc::new(provider), pool, budget)
        .with_key_words(key_words)
        .with_language(output.language);
    Ok(Pipeline::new(
        summarizer,
        ExportOptions {
            root: output.root.clone(),
            format: output.file_format,
        },
    ))
}

async fn summarize_all(pipeline: Pipeline, sources: Vec<PaperSource>, concurrent: bool) -> Result<()> {
    if sources.is_empty() {
        warn!("No papers to summarize");
        return Ok(());
    }

    let written = pipeline.run(sources, concurrent).await;
    for path in &written {
        println!("{}", path.display());
    }
    Ok(())
}

async fn run_paper(args: PaperArgs) -> Result<()> {
    let pipeline = build_pipeline(&args.output, &args.key_word)?;
    info!("Query: {}", args.query);
    info!("Sort: {:?}", args.sort);

    let sources: Vec<PaperSource> = match &args.pdf {
        Some(pdf) => {
            info!("Reading PDFs from {}", pdf.display());
            collect_pdfs(pdf)
                .with_context(|| format!("Failed to read {}", pdf.display()))?
                .into_iter()
                .map(PaperSource::Local)
                .collect()
        }
        None => {
            let client = ArxivClient::new(&args.arxiv_base);
            let entries = client
                .search(&args.query, args.max_results, args.sort)
                .await
                .context("arXiv query failed")?;
            info!("filter_keys {:?}", args.filter_keys);
            let kept = search::filter_entries(entries, &args.filter_keys);
            info!("filter_results: {}", kept.len());
            let dir = search::download_dir(&args.output.root, &args.query, &Local::now());
            client
                .download_all(kept, &dir)
                .await
                .with_context(|| format!("Failed to prepare {}", dir.display()))?
                .into_iter()
                .map(PaperSource::Loaded)
                .collect()
        }
    };

    summarize_all(pipeline, sources, args.output.concurrent).await
}

async fn run_biorxiv(args: BiorxivArgs) -> Result<()> {
    let pipeline = build_pipeline(&args.output, &args.category.join(","))?;
    let interval = args.date.unwrap_or(Interval::Days(args.days));

    let mut client = BiorxivClient::new(args.server).with_api_base(&args.biorxiv_api);
    if let Some(content_base) = &args.content_base {
        client = client.with_content_base(content_base);
    }
    let entries = client
        .search(interval, &args.category, args.max_results)
        .await
        .context("bioRxiv query failed")?;
    info!("filter_keys {:?}", args.filter_keys);
    let kept = search::filter_entries(entries, &args.filter_keys);
    info!("filter_results: {}", kept.len());

    let dir = biorxiv::download_dir(&args.output.root, &args.category, &Local::now());
    let sources = client
        .download_all(kept, &dir)
        .await
        .with_context(|| format!("Failed to prepare {}", dir.display()))?
        .into_iter()
        .map(PaperSource::Loaded)
        .collect();

    summarize_all(pipeline, sources, args.output.concurrent).await
}

fn run_config(set: &[String]) -> Result<()> {
    let locations = ConfigLocations::discover();
    let path = if set.is_empty() {
        config::create_default(&locations)
    } else {
        config::set_values(set, &locations)
    }
    .context("Failed to write configuration")?;
    println!("{}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match args.command {
        Command::Paper(paper_args) => run_paper(paper_args).await,
        Command::Biorxiv(biorxiv_args) => run_biorxiv(biorxiv_args).await,
        Command::Config { set } => run_config(&set),
    }
}
