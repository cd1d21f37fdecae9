use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use jobscout_client::{
    AzureEmbeddingClient, IndeedProvider, JSearchProvider, ReqwestTransport, TokenUsageTracker,
    index_limit,
};
use jobscout_core::cache::JobCache;
use jobscout_core::models::{
    DEFAULT_COUNTRY, DEFAULT_JOB_TYPE, DEFAULT_LOCATION, DEFAULT_MAX_ROWS, Job, SearchQuery,
};
use jobscout_core::{RateLimiter, Settings, SourceAggregator};

const DEFAULT_CACHE_FILE: &str = ".jobscout_cache.json";

#[derive(Parser)]
#[command(
    name = "jobscout",
    version,
    about = "Job search with retries, caching and source failover"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for jobs, serving repeated searches from the cache
    Search {
        /// Search terms, e.g. "Rust Developer"
        query: String,

        #[arg(short, long, default_value = DEFAULT_LOCATION)]
        location: String,

        #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_ROWS)]
        max_rows: usize,

        /// fulltime, parttime, contract or internship
        #[arg(short, long, default_value = DEFAULT_JOB_TYPE)]
        job_type: String,

        #[arg(short, long, default_value = DEFAULT_COUNTRY)]
        country: String,

        /// Ignore any cached result and search again
        #[arg(long, default_value_t = false)]
        force_refresh: bool,

        /// Only query the fallback source
        #[arg(long, default_value_t = false, conflicts_with = "no_fallback")]
        fallback_only: bool,

        /// Never query the fallback source
        #[arg(long, default_value_t = false)]
        no_fallback: bool,

        #[arg(long, default_value = DEFAULT_CACHE_FILE)]
        cache_file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Embed the top jobs after searching (needs Azure OpenAI credentials)
        #[arg(long, default_value_t = false)]
        embed: bool,

        /// How many matches the embeddings should leave room for
        #[arg(long, default_value_t = 10)]
        top_matches: usize,

        /// RapidAPI key (reads from RAPIDAPI_KEY env var if not provided)
        #[arg(long, env = "RAPIDAPI_KEY", hide_env_values = true)]
        rapidapi_key: String,

        #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
        azure_api_key: Option<String>,

        #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
        azure_endpoint: Option<String>,
    },

    /// Inspect or maintain the job cache file
    Cache {
        #[arg(long, default_value = DEFAULT_CACHE_FILE)]
        cache_file: PathBuf,

        /// Drop expired entries
        #[arg(long, default_value_t = false)]
        purge_expired: bool,

        /// Drop every entry
        #[arg(long, default_value_t = false)]
        clear: bool,
    },

    /// Embed one text and report the vector size and tokens used
    Embed {
        text: String,

        #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
        api_key: String,

        #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
        endpoint: String,
    },
}

struct SearchArgs {
    query: SearchQuery,
    force_refresh: bool,
    fallback_only: bool,
    no_fallback: bool,
    cache_file: PathBuf,
    format: OutputFormat,
    embed: bool,
    top_matches: usize,
    rapidapi_key: String,
    azure: Option<(String, String)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("jobscout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Commands::Search {
            query,
            location,
            max_rows,
            job_type,
            country,
            force_refresh,
            fallback_only,
            no_fallback,
            cache_file,
            format,
            embed,
            top_matches,
            rapidapi_key,
            azure_api_key,
            azure_endpoint,
        } => {
            let args = SearchArgs {
                query: SearchQuery::new(query)
                    .with_location(location)
                    .with_max_rows(max_rows)
                    .with_job_type(job_type)
                    .with_country(country),
                force_refresh,
                fallback_only,
                no_fallback,
                cache_file,
                format,
                embed,
                top_matches,
                rapidapi_key,
                azure: azure_api_key.zip(azure_endpoint),
            };
            cmd_search(args, &settings).await?;
        }
        Commands::Cache {
            cache_file,
            purge_expired,
            clear,
        } => cmd_cache(&cache_file, purge_expired, clear)?,
        Commands::Embed {
            text,
            api_key,
            endpoint,
        } => cmd_embed(&text, &api_key, &endpoint).await?,
    }

    Ok(())
}

async fn cmd_search(args: SearchArgs, settings: &Settings) -> Result<()> {
    let transport = ReqwestTransport::new().context("Failed to create HTTP client")?;

    let primary = IndeedProvider::new(
        transport.clone(),
        &args.rapidapi_key,
        RateLimiter::new(settings.max_requests_per_minute),
    );
    let fallback = (!args.no_fallback).then(|| {
        JSearchProvider::new(
            transport.clone(),
            &args.rapidapi_key,
            RateLimiter::new(settings.max_requests_per_minute),
        )
    });
    let mut config = settings.aggregator_config();
    config.prefer_fallback_only |= args.fallback_only;
    let aggregator = SourceAggregator::new(Some(primary), fallback, config);

    let cache = JobCache::load(&args.cache_file)
        .with_context(|| format!("Failed to load cache file: {}", args.cache_file.display()))?;

    tracing::info!(query = %args.query.query, location = %args.query.location, "Searching jobs");
    let jobs = cache
        .fetch_with_cache(
            &aggregator,
            &args.query,
            settings.cache_ttl_hours,
            args.force_refresh,
        )
        .await
        .context("Job search failed")?;

    if aggregator.primary_quota_exceeded() {
        tracing::info!("Primary job source is out of quota; results came from the fallback source");
    }
    if let Some(error) = aggregator.last_error() {
        tracing::warn!(%error, "A job source failed during this search");
    }

    if jobs.is_empty() {
        println!("No jobs found for \"{}\" in {}", args.query.query, args.query.location);
    } else {
        print_jobs(&jobs, args.format)?;
    }

    if args.embed && !jobs.is_empty() {
        match &args.azure {
            Some((api_key, endpoint)) => {
                embed_jobs(&transport, api_key, endpoint, &jobs, args.top_matches, settings).await;
            }
            None => tracing::warn!(
                "--embed needs AZURE_OPENAI_API_KEY and AZURE_OPENAI_ENDPOINT, skipping embeddings"
            ),
        }
    }

    cache
        .save(&args.cache_file)
        .with_context(|| format!("Failed to write cache file: {}", args.cache_file.display()))?;

    Ok(())
}

async fn embed_jobs(
    transport: &ReqwestTransport,
    api_key: &str,
    endpoint: &str,
    jobs: &[Job],
    top_matches: usize,
    settings: &Settings,
) {
    let usage = TokenUsageTracker::new();
    let client = AzureEmbeddingClient::new(transport.clone(), api_key, endpoint)
        .with_batching(settings.embedding_batch_size, settings.embedding_batch_delay())
        .with_usage_tracker(usage.clone());

    let limit = index_limit(jobs.len(), top_matches, settings.max_jobs_to_index);
    let texts: Vec<String> = jobs[..limit].iter().map(Job::embedding_text).collect();
    let batch = client
        .get_embeddings_batch(&texts, settings.embedding_batch_size)
        .await;

    let summary = usage.summary();
    tracing::info!(
        indexed = batch.embeddings.len(),
        requested = limit,
        skipped_batches = batch.skipped_batches,
        tokens = summary.embedding_tokens,
        cost_usd = summary.estimated_cost_usd,
        "Embedded jobs"
    );
}

fn print_jobs(jobs: &[Job], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(jobs)?),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            writer.write_record([
                "title",
                "company",
                "location",
                "job_type",
                "posted_date",
                "remote",
                "source",
                "url",
            ])?;
            for job in jobs {
                writer.write_record([
                    job.title.as_str(),
                    job.company.as_str(),
                    job.location.as_str(),
                    job.job_type.as_str(),
                    job.posted_date.as_str(),
                    if job.is_remote { "yes" } else { "no" },
                    job.source.as_str(),
                    job.url.as_str(),
                ])?;
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            for (i, job) in jobs.iter().enumerate() {
                println!(
                    "{:>3}. {} | {} | {} [{}]",
                    i + 1,
                    job.title,
                    job.company,
                    job.location,
                    job.source
                );
                println!("     {}", job.url);
            }
            println!("\nTotal: {} jobs", jobs.len());
        }
    }
    Ok(())
}

fn cmd_cache(cache_file: &Path, purge_expired: bool, clear: bool) -> Result<()> {
    let cache = JobCache::load(cache_file)
        .with_context(|| format!("Failed to load cache file: {}", cache_file.display()))?;

    if clear {
        let removed = cache.len();
        cache.clear();
        println!("Removed {removed} cache entries");
    } else if purge_expired {
        println!("Removed {} expired cache entries", cache.purge_expired());
    }
    if clear || purge_expired {
        cache
            .save(cache_file)
            .with_context(|| format!("Failed to write cache file: {}", cache_file.display()))?;
    }

    let entries = cache.entries();
    if entries.is_empty() {
        println!("Cache is empty ({})", cache_file.display());
        return Ok(());
    }

    let now = Utc::now();
    println!("Cached searches in {}:\n", cache_file.display());
    for entry in &entries {
        let status = if entry.is_valid_at(now) {
            let minutes = entry.minutes_left(now);
            format!("expires in {}h {:02}m", minutes / 60, minutes % 60)
        } else {
            "expired".to_string()
        };
        println!(
            "  {}: {} jobs, stored {} ({})",
            entry.key,
            entry.count,
            entry.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            status
        );
    }
    println!("\nTotal: {} entries", entries.len());

    Ok(())
}

async fn cmd_embed(text: &str, api_key: &str, endpoint: &str) -> Result<()> {
    let transport = ReqwestTransport::new().context("Failed to create HTTP client")?;
    let client = AzureEmbeddingClient::new(transport, api_key, endpoint);

    let embedding = client
        .get_embedding(text)
        .await
        .context("Embedding request failed")?;

    println!(
        "dimensions: {}\ntokens: {}\nestimated cost: ${:.6}",
        embedding.vector.len(),
        embedding.tokens_used,
        client.usage().summary().estimated_cost_usd
    );
    Ok(())
}
