use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use content_digest::ai::LlmClient;
use content_digest::config::Config;
use content_digest::db::Repository;
use content_digest::feed::FeedFetcher;
use content_digest::pipeline::{CategoryOutcome, Collaborators, Coordinator, Force};
use content_digest::services::{build_digest, write_digest, ContentFetcher, OgThumbnailer};

#[derive(Parser)]
#[command(name = "content-digest", version, about = "Daily feed digest pipeline")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, rate, select, summarize and render every category
    Run {
        /// Last run date (YYYY-MM-DD), today by default
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Number of dates ending at --date
        #[arg(long)]
        days: Option<u32>,

        /// Rebuild every category even if it already has output
        #[arg(long, conflicts_with = "force_category")]
        force: bool,

        /// Rebuild one category even if it already has output
        #[arg(long)]
        force_category: Option<String>,
    },
    /// Fail items of a category stuck before a date
    Finalize {
        #[arg(long)]
        category: String,
        #[arg(long)]
        before: NaiveDate,
    },
    /// Mark every in-flight item complete
    ForceFinalize,
    /// Write the digest for a date
    Digest {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show item counts per status
    Status {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let today = Coordinator::today();

    match cli.command {
        Command::Run {
            date,
            days,
            force,
            force_category,
        } => {
            let force = match (force, force_category) {
                (true, _) => Force::All,
                (false, Some(category)) => {
                    config.category(&category)?;
                    Force::Category(category)
                }
                (false, None) => Force::None,
            };
            let dates =
                Coordinator::dates_back(date.unwrap_or(today), days.unwrap_or(config.days_back));

            let llm = Arc::new(LlmClient::from_config(&config)?);
            let collaborators = Collaborators {
                feeds: Arc::new(FeedFetcher::new()?),
                extractor: Arc::new(ContentFetcher::new()?),
                rater: llm.clone(),
                summarizer: llm,
                thumbnailer: Arc::new(OgThumbnailer::new(&config.output_dir)?),
            };

            let coordinator = Coordinator::new(&config, collaborators).await?;
            let report = coordinator.run(&dates, &force).await;

            for run in &report.runs {
                let outcome = match &run.outcome {
                    CategoryOutcome::Skipped => "skipped".to_string(),
                    CategoryOutcome::Processed(r) => format!(
                        "fetched {} rated {} selected {} summarized {} complete {}",
                        r.fetch.advanced,
                        r.rate.advanced,
                        r.selected,
                        r.summarize.advanced,
                        r.render.advanced + r.finalized,
                    ),
                    CategoryOutcome::Failed { error } => format!("failed: {error}"),
                };
                println!("{} {:<16} {}", run.date, run.category, outcome);
            }
            coordinator.stats().log_report();
            print!("{}", coordinator.stats().render_report());
        }
        Command::Finalize { category, before } => {
            let repo = Repository::new(&config.db_path).await?;
            let failed = repo.finalize_stuck_items(&category, before).await?;
            println!("Marked {failed} stuck items of {category} as failed");
        }
        Command::ForceFinalize => {
            let repo = Repository::new(&config.db_path).await?;
            let completed = repo.force_finalize_all().await?;
            println!("Marked {completed} items complete");
        }
        Command::Digest { date } => {
            let repo = Repository::new(&config.db_path).await?;
            let digest = build_digest(&repo, date.unwrap_or(today)).await?;
            if digest.is_empty() {
                println!("Nothing to export for {}", digest.date);
            } else {
                let dir = write_digest(Path::new(&config.output_dir), &digest).await?;
                println!("Wrote {} entries to {}", digest.len(), dir.display());
            }
        }
        Command::Status { category, date } => {
            let repo = Repository::new(&config.db_path).await?;
            let counts = match category {
                Some(category) => {
                    repo.status_counts(&category, date.unwrap_or(today)).await?
                }
                None => repo.total_status_counts().await?,
            };
            for (status, count) in counts {
                println!("{status:<22} {count}");
            }
        }
    }

    Ok(())
}
