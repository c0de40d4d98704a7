pub mod browser;
pub mod cli;
pub mod config;
pub mod dedupe;
pub mod llm;
pub mod logging;
pub mod models;
pub mod output;
pub mod scraping;
pub mod store;
mod utils;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn, Level};

use browser::{Page, StaticPage};
use cli::{Cli, Command, ScrapeArgs, StoreKind};
use config::{AppConfig, ConfigError, SupabaseCredentials};
use dedupe::{DedupeBy, KeepPolicy};
use llm::{LlmClassifier, TagClassifier};
use models::Event;
use output::CsvCheckpoint;
use scraping::collector::{Pause, ThreadPause};
use scraping::details::{DetailEnricher, DetailSource};
use store::postgrest::PostgrestStore;
use store::sqlite::SqliteStore;
use store::{RowStore, UpsertOptions};

/// Where a scrape run sends its final batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Csv(PathBuf),
    JsonFile(PathBuf),
    Stdout,
    Store(StoreKind),
}

impl Destination {
    fn from_args(args: &ScrapeArgs) -> Self {
        if let Some(kind) = args.store {
            return Destination::Store(kind);
        }
        if args.json {
            return Destination::Stdout;
        }
        let path = args.output.clone().unwrap_or_else(utils::default_csv_path);
        if utils::is_json_path(&path) {
            Destination::JsonFile(path)
        } else {
            Destination::Csv(path)
        }
    }
}

/// Collect, classify (optional), dedupe. The returned batch has unique
/// identity keys apart from keyless events.
pub fn harvest<G, D, P, F>(
    config: &AppConfig,
    page: &mut G,
    details: &D,
    classifier: Option<&dyn TagClassifier>,
    keep: KeepPolicy,
    pause: P,
    on_event: F,
) -> Vec<Event>
where
    G: Page,
    D: DetailSource + ?Sized,
    P: Pause,
    F: FnMut(&Event),
{
    let collection = scraping::collect_calendar(config, page, details, pause, on_event);
    let mut events = collection.events;

    if let Some(classifier) = classifier {
        let tagged = llm::classify_all(classifier, &mut events);
        info!(tagged, total = events.len(), "classification finished");
    }

    let deduped = dedupe::dedupe(events, keep, DedupeBy::NameAndLink);
    if deduped.removed > 0 {
        info!(removed = deduped.removed, "dropped duplicate events");
    }
    deduped.events
}

fn open_store(kind: StoreKind, config: &AppConfig) -> Result<Box<dyn RowStore>> {
    let store: Box<dyn RowStore> = match kind {
        StoreKind::Supabase => {
            let credentials = SupabaseCredentials::from_env()?;
            Box::new(PostgrestStore::new(
                &credentials,
                &config.store.table,
                config.store.timeout(),
            )?)
        }
        StoreKind::Sqlite => Box::new(SqliteStore::open_default(&config.store.table)?),
    };
    Ok(store)
}

fn upsert_options(config: &AppConfig) -> UpsertOptions {
    UpsertOptions {
        conflict_column: config.store.conflict_column.clone(),
        batch_size: config.store.batch_size,
        coercions: config.store.coercions.clone(),
    }
}

fn submit(store: &dyn RowStore, events: &[Event], config: &AppConfig) {
    let report = store::upsert_events(store, events, &upsert_options(config));
    if !report.skipped.is_empty() {
        warn!(
            skipped = report.skipped.len(),
            "some rows were not accepted by the store"
        );
    }
}

fn scrape(mut config: AppConfig, args: ScrapeArgs) -> Result<()> {
    args.scroll.apply(&mut config);
    args.store_options.apply(&mut config);
    if let Some(url) = &args.calendar_url {
        config.calendar_url = url.clone();
    }
    if let Some(year) = args.year {
        config.event_year = year;
    }
    config.validate()?;

    let destination = Destination::from_args(&args);
    // Credentials are checked before any page is loaded.
    if args.classify {
        config::check_classifier_credentials()?;
    }
    let store = match &destination {
        Destination::Store(kind) => Some(open_store(*kind, &config)?),
        _ => None,
    };
    let classifier = if args.classify {
        Some(LlmClassifier::from_env().context("unable to build classifier")?)
    } else {
        None
    };

    let mut page = StaticPage::new(config.detail_timeout())?;
    let details = DetailEnricher::new(config.detail_timeout())?;
    let mut checkpoint = match &destination {
        Destination::Csv(path) => Some(
            CsvCheckpoint::create(path)
                .with_context(|| format!("unable to create {}", path.display()))?,
        ),
        _ => None,
    };

    info!(url = %config.calendar_url, ?destination, "starting scrape");
    let events = harvest(
        &config,
        &mut page,
        &details,
        classifier.as_ref().map(|c| c as &dyn TagClassifier),
        args.keep,
        ThreadPause,
        |event| {
            if let Some(checkpoint) = checkpoint.as_mut() {
                if let Err(err) = checkpoint.append(event) {
                    warn!("checkpoint write failed: {err}");
                }
            }
        },
    );

    match destination {
        Destination::Csv(path) => {
            if let Some(checkpoint) = checkpoint.take() {
                info!(streamed = checkpoint.written(), "checkpoint complete");
            }
            output::write_csv(&path, &events)
                .with_context(|| format!("unable to write {}", path.display()))?;
            info!(events = events.len(), path = %path.display(), "csv written");
        }
        Destination::JsonFile(path) => {
            output::write_json(&path, &events)
                .with_context(|| format!("unable to write {}", path.display()))?;
            info!(events = events.len(), path = %path.display(), "json written");
        }
        Destination::Stdout => println!("{}", output::to_json(&events)?),
        Destination::Store(_) => {
            if let Some(store) = store.as_deref() {
                submit(store, &events, &config);
            }
        }
    }
    Ok(())
}

fn tag_csv(path: &Path) -> Result<()> {
    config::check_classifier_credentials()?;
    let classifier = LlmClassifier::from_env().context("unable to build classifier")?;
    let mut events =
        output::read_csv(path).with_context(|| format!("unable to read {}", path.display()))?;
    info!(rows = events.len(), path = %path.display(), "tagging csv");
    let tagged = llm::classify_all(&classifier, &mut events);
    output::write_csv(path, &events)
        .with_context(|| format!("unable to write {}", path.display()))?;
    info!(tagged, total = events.len(), "csv re-tagged");
    Ok(())
}

fn dedupe_csv(
    path: &Path,
    keep: KeepPolicy,
    by: DedupeBy,
    dry_run: bool,
    output_path: Option<&Path>,
) -> Result<()> {
    let events =
        output::read_csv(path).with_context(|| format!("unable to read {}", path.display()))?;
    let groups = dedupe::duplicate_groups(&events, by);
    info!(rows = events.len(), groups = groups.len(), ?by, "duplicate scan");

    if dry_run {
        for (key, count) in &groups {
            println!("{count}x {key}");
        }
        return Ok(());
    }

    let result = dedupe::dedupe(events, keep, by);
    let target = output_path.unwrap_or(path);
    output::write_csv(target, &result.events)
        .with_context(|| format!("unable to write {}", target.display()))?;
    info!(
        removed = result.removed,
        kept = result.events.len(),
        path = %target.display(),
        "csv deduplicated"
    );
    Ok(())
}

fn load_csv(config: &AppConfig, kind: StoreKind, path: &Path) -> Result<()> {
    let store = open_store(kind, config)?;
    let events =
        output::read_csv(path).with_context(|| format!("unable to read {}", path.display()))?;
    let total = events.len();
    let events: Vec<Event> = events
        .into_iter()
        .filter(|event| !event.event_name.trim().is_empty())
        .collect();
    if events.len() < total {
        warn!(skipped = total - events.len(), "rows without a name skipped");
    }
    submit(store.as_ref(), &events, config);
    Ok(())
}

fn reconcile(config: &AppConfig, kind: StoreKind, dry_run: bool) -> Result<()> {
    let store = open_store(kind, config)?;
    let records = store.fetch_all().context("unable to read stored events")?;
    let plan = dedupe::plan_reconciliation(&records);
    info!(
        records = records.len(),
        groups = plan.groups,
        delete = plan.delete.len(),
        "reconciliation planned"
    );
    if dry_run {
        for id in &plan.delete {
            println!("would delete {id}");
        }
        return Ok(());
    }
    let deleted = store::delete_records(store.as_ref(), &plan.delete);
    info!(deleted, "reconciliation finished");
    Ok(())
}

fn execute(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Scrape(args) => scrape(config, args),
        Command::Tag { csv } => tag_csv(&csv),
        Command::Dedupe {
            csv,
            keep,
            by,
            dry_run,
            output,
        } => dedupe_csv(&csv, keep, by, dry_run, output.as_deref()),
        Command::Load { csv, store } => {
            store.options.apply(&mut config);
            config.validate()?;
            load_csv(&config, store.store, &csv)
        }
        Command::Reconcile { store, dry_run } => {
            store.options.apply(&mut config);
            config.validate()?;
            reconcile(&config, store.store, dry_run)
        }
    }
}

pub fn run() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let level = if cli.quiet {
        Level::WARN
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    logging::init_logging(level);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<ConfigError>() {
            Some(config_err) => {
                eprintln!("configuration error: {config_err}");
                ExitCode::from(2)
            }
            None => {
                error!("{err:#}");
                ExitCode::from(1)
            }
        },
    }
}
