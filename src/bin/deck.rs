#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deck_harness::dataservice::{DataService, HttpDataService, UnavailableDataService};
use deck_harness::gateway::{ProviderGateway, TracingUsageSink};
use deck_harness::{
    DeckPipeline, JsonlTraceSink, PipelineConfig, SlideDeck, SqliteQueryCache, TraceSink,
};

#[derive(Parser)]
#[command(name = "deck", version, about = "Data-backed HTML slide deck generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan queries, fetch data and generate a new deck
    Generate {
        #[arg(long, conflicts_with = "request_file")]
        request: Option<String>,
        #[arg(long)]
        request_file: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        max_slides: usize,
        /// Pipeline config JSON (environment overrides still apply)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Where to write the deck HTML
        #[arg(long)]
        out: PathBuf,
        /// Optional JSON dump of the full run (plan, summaries, stats, trace)
        #[arg(long)]
        session_out: Option<PathBuf>,
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Query cache database (defaults to DECK_QUERY_CACHE_PATH)
        #[arg(long)]
        cache: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        no_cache: bool,
    },
    /// Regenerate a contiguous run of slides in an existing deck
    Edit {
        #[arg(long)]
        deck: PathBuf,
        #[arg(long)]
        request: String,
        /// Slide indices to replace, e.g. `2,3`
        #[arg(long, value_delimiter = ',', required = true)]
        indices: Vec<usize>,
        /// Output path; defaults to overwriting --deck
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Print the structured view of a deck
    Inspect {
        #[arg(long)]
        deck: PathBuf,
        /// Print the full JSON view instead of a slide listing
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Render one slide as a standalone document
    RenderSlide {
        #[arg(long)]
        deck: PathBuf,
        #[arg(long)]
        index: usize,
        /// Defaults to stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export the query cache to JSONL
    CacheExport {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Prune the query cache (by age and/or size)
    CachePrune {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        max_age_days: Option<u64>,
        #[arg(long)]
        max_rows: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            request,
            request_file,
            max_slides,
            config,
            out,
            session_out,
            trace,
            cache,
            no_cache,
        } => {
            let request = match (request, request_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => return Err("generate requires --request or --request-file".into()),
            };
            let config = load_config(config.as_deref())?;

            let gateway = Arc::new(ProviderGateway::from_env(Arc::new(TracingUsageSink))?);
            let service: Arc<dyn DataService> = Arc::new(HttpDataService::from_env()?);
            let mut pipeline = DeckPipeline::new(gateway, service, config);

            let _cache_lock = if no_cache {
                None
            } else {
                let path = cache.unwrap_or_else(SqliteQueryCache::default_path);
                let cache = SqliteQueryCache::new(path)?;
                let lock = cache.lock_exclusive()?;
                pipeline = pipeline.with_cache(Arc::new(cache));
                Some(lock)
            };

            let (pipeline, trace_worker) = attach_trace(pipeline, trace)?;
            let result = pipeline.generate_new(&request, max_slides).await;
            drop(pipeline);
            if let Some(worker) = trace_worker {
                worker.join()?;
            }
            let output = result?;

            std::fs::write(&out, &output.html)?;
            let stats = &output.compression_stats;
            eprintln!(
                "[deck] {} slides written to {} ({} queries, {} failed; rows {} -> {}, tokens {} -> {})",
                output.slide_count,
                out.display(),
                output.queries_planned.len(),
                stats.queries_failed,
                stats.original_rows,
                stats.summarized_rows,
                stats.original_tokens,
                stats.summarized_tokens,
            );
            if let Some(path) = session_out {
                write_json(&path, &output)?;
                eprintln!("[deck] session written to {}", path.display());
            }
        }
        Commands::Edit {
            deck: deck_path,
            request,
            indices,
            out,
            config,
            trace,
        } => {
            let mut deck = read_deck(&deck_path)?;
            let config = load_config(config.as_deref())?;

            let gateway = Arc::new(ProviderGateway::from_env(Arc::new(TracingUsageSink))?);
            let pipeline = DeckPipeline::new(gateway, Arc::new(UnavailableDataService), config);
            let (pipeline, trace_worker) = attach_trace(pipeline, trace)?;

            let result = pipeline.edit_deck(&mut deck, &request, &indices).await;
            drop(pipeline);
            if let Some(worker) = trace_worker {
                worker.join()?;
            }
            let outcome = result?;

            let out = out.unwrap_or(deck_path);
            std::fs::write(&out, deck.knit())?;
            eprintln!(
                "[deck] replaced slides {:?} with {} (net {:+}) after {} attempt(s); {} slides written to {}",
                outcome.patch.original_indices,
                outcome.patch.replacement_slides.len(),
                outcome.patch.net_change,
                outcome.attempts,
                outcome.slide_count,
                out.display()
            );
        }
        Commands::Inspect { deck, json } => {
            let deck = read_deck(&deck)?;
            let view = deck.view();
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            if json {
                serde_json::to_writer_pretty(&mut handle, &view)?;
                writeln!(handle)?;
            } else {
                writeln!(
                    handle,
                    "title: {}",
                    view.title.as_deref().unwrap_or("(untitled)")
                )?;
                writeln!(
                    handle,
                    "slides: {}  css: {} chars  scripts: {} chars  external scripts: {}",
                    view.slide_count,
                    view.css.len(),
                    view.scripts.len(),
                    view.external_scripts.len()
                )?;
                for slide in &deck.slides {
                    let canvases = slide.canvas_ids();
                    writeln!(
                        handle,
                        "  {}  canvases: [{}]",
                        slide.slide_id.as_deref().unwrap_or("-"),
                        canvases.join(", ")
                    )?;
                }
            }
        }
        Commands::RenderSlide { deck, index, out } => {
            let deck = read_deck(&deck)?;
            let html = deck.render_slide(index)?;
            match out {
                Some(path) => std::fs::write(path, html)?,
                None => io::stdout().write_all(html.as_bytes())?,
            }
        }
        Commands::CacheExport { db, out } => {
            let path = db.unwrap_or_else(SqliteQueryCache::default_path);
            let cache = SqliteQueryCache::new(path)?;
            let written = cache.export_jsonl(&out).await?;
            eprintln!("[deck] exported {written} cache rows to {}", out.display());
        }
        Commands::CachePrune {
            db,
            max_age_days,
            max_rows,
        } => {
            if max_age_days.is_none() && max_rows.is_none() {
                return Err("cache-prune requires --max-age-days and/or --max-rows".into());
            }
            if matches!(max_rows, Some(0)) {
                return Err("--max-rows must be >= 1".into());
            }
            let path = db.unwrap_or_else(SqliteQueryCache::default_path);
            let cache = SqliteQueryCache::new(path)?;
            let _lock = cache.lock_exclusive()?;
            let stats = cache.prune(max_age_days, max_rows).await?;
            println!(
                "pruned {} rows; {} rows remain",
                stats.deleted, stats.remaining
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::from_env()?,
    })
}

fn read_deck(path: &Path) -> Result<SlideDeck, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(SlideDeck::parse(&raw)?)
}

fn attach_trace(
    pipeline: DeckPipeline,
    path: Option<PathBuf>,
) -> Result<(DeckPipeline, Option<deck_harness::TraceWorker>), Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let (sink, worker) = JsonlTraceSink::new(path)?;
            let sink: Arc<dyn TraceSink> = Arc::new(sink);
            Ok((pipeline.with_trace_sink(sink), Some(worker)))
        }
        None => Ok((pipeline, None)),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
