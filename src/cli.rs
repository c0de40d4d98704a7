use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::AppConfig;
use crate::dedupe::{DedupeBy, KeepPolicy};

#[derive(Parser, Debug)]
#[command(name = "tech-week-scrape")]
#[command(about = "Harvests the Tech Week SF calendar into a deduplicated event table")]
#[command(version)]
pub struct Cli {
    /// JSON config file; flags override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log debug detail
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect the calendar, enrich each event and write the result
    Scrape(ScrapeArgs),
    /// Classify every row of an existing CSV in place
    Tag {
        csv: PathBuf,
    },
    /// Remove duplicate rows from a CSV
    Dedupe {
        csv: PathBuf,
        #[arg(long, value_enum, default_value_t = KeepPolicy::First)]
        keep: KeepPolicy,
        #[arg(long, value_enum, default_value_t = DedupeBy::NameAndLink)]
        by: DedupeBy,
        /// Report duplicates without writing
        #[arg(long)]
        dry_run: bool,
        /// Write here instead of overwriting the input
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Submit an existing CSV to a store
    Load {
        csv: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Delete lower-quality rows that share an event URL
    Reconcile {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Supabase,
    Sqlite,
}

#[derive(Args, Debug)]
pub struct ScrapeArgs {
    /// Classify each event before writing
    #[arg(long)]
    pub classify: bool,

    #[arg(long, value_enum, default_value_t = KeepPolicy::First)]
    pub keep: KeepPolicy,

    /// CSV path, or a .json path for a JSON file
    #[arg(long, short, conflicts_with_all = ["json", "store"])]
    pub output: Option<PathBuf>,

    /// Print a JSON array to stdout instead of writing a file
    #[arg(long, conflicts_with = "store")]
    pub json: bool,

    #[arg(long, value_enum)]
    pub store: Option<StoreKind>,

    #[command(flatten)]
    pub store_options: StoreOptions,

    #[command(flatten)]
    pub scroll: ScrollArgs,

    #[arg(long)]
    pub calendar_url: Option<String>,

    /// Year stamped on card dates
    #[arg(long)]
    pub year: Option<i32>,
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    #[arg(long, value_enum)]
    pub store: StoreKind,

    #[command(flatten)]
    pub options: StoreOptions,
}

#[derive(Args, Debug, Default)]
pub struct StoreOptions {
    #[arg(long)]
    pub table: Option<String>,
    #[arg(long)]
    pub conflict_column: Option<String>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Rewrite dates to ISO in this year
    #[arg(long)]
    pub date_year: Option<i32>,
    #[arg(long)]
    pub price_numeric: bool,
    #[arg(long)]
    pub coerce_time: bool,
    #[arg(long)]
    pub no_nulls: bool,
}

#[derive(Args, Debug, Default)]
pub struct ScrollArgs {
    #[arg(long)]
    pub max_cycles: Option<u32>,
    #[arg(long)]
    pub stable_rounds: Option<u32>,
    #[arg(long)]
    pub min_items: Option<usize>,
    #[arg(long)]
    pub scroll_delay_ms: Option<u64>,
    #[arg(long)]
    pub load_more_delay_ms: Option<u64>,
    #[arg(long)]
    pub dwell_every: Option<u32>,
    #[arg(long)]
    pub dwell_ms: Option<u64>,
    #[arg(long)]
    pub no_pagination_shortcut: bool,
}

impl StoreOptions {
    pub fn apply(&self, config: &mut AppConfig) {
        let store = &mut config.store;
        if let Some(table) = &self.table {
            store.table = table.clone();
        }
        if let Some(column) = &self.conflict_column {
            store.conflict_column = Some(column.clone()).filter(|c| !c.is_empty());
        }
        if let Some(size) = self.batch_size {
            store.batch_size = size;
        }
        if self.date_year.is_some() {
            store.coercions.date_year = self.date_year;
        }
        store.coercions.price_numeric |= self.price_numeric;
        store.coercions.coerce_time |= self.coerce_time;
        store.coercions.no_nulls |= self.no_nulls;
    }
}

impl ScrollArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        let scroll = &mut config.scroll;
        if let Some(v) = self.max_cycles {
            scroll.max_cycles = v;
        }
        if let Some(v) = self.stable_rounds {
            scroll.stable_rounds = v;
        }
        if let Some(v) = self.min_items {
            scroll.min_items = v;
        }
        if let Some(v) = self.scroll_delay_ms {
            scroll.scroll_delay_ms = v;
        }
        if let Some(v) = self.load_more_delay_ms {
            scroll.load_more_delay_ms = v;
        }
        if let Some(v) = self.dwell_every {
            scroll.dwell_every = v;
        }
        if let Some(v) = self.dwell_ms {
            scroll.dwell_ms = v;
        }
        if self.no_pagination_shortcut {
            scroll.pagination_shortcut = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scrape_flags_override_config() {
        let cli = Cli::parse_from([
            "tech-week-scrape",
            "scrape",
            "--stable-rounds",
            "3",
            "--min-items",
            "500",
            "--store",
            "sqlite",
            "--table",
            "Event List",
            "--date-year",
            "2025",
            "--keep",
            "last",
        ]);
        let Command::Scrape(args) = cli.command else {
            panic!("expected scrape");
        };
        let mut config = AppConfig::default();
        args.scroll.apply(&mut config);
        args.store_options.apply(&mut config);
        assert_eq!(config.scroll.stable_rounds, 3);
        assert_eq!(config.scroll.min_items, 500);
        assert_eq!(config.store.table, "Event List");
        assert_eq!(config.store.coercions.date_year, Some(2025));
        assert_eq!(args.store, Some(StoreKind::Sqlite));
        assert_eq!(args.keep, KeepPolicy::Last);
    }

    #[test]
    fn destinations_are_exclusive() {
        assert!(Cli::try_parse_from(["tech-week-scrape", "scrape", "--json", "--store", "sqlite"]).is_err());
        assert!(Cli::try_parse_from(["tech-week-scrape", "scrape", "-o", "x.csv", "--json"]).is_err());
    }

    #[test]
    fn dedupe_methods_use_snake_case() {
        let cli = Cli::parse_from(["tech-week-scrape", "dedupe", "in.csv", "--by", "name_date", "--dry-run"]);
        match cli.command {
            Command::Dedupe { by, dry_run, .. } => {
                assert_eq!(by, DedupeBy::NameDate);
                assert!(dry_run);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
