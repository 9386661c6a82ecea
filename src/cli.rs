//! CLI definitions for tka.
//!
//! Uses clap for argument parsing with derive macros.

use crate::analytics::{ComparisonKind, Grouping, GrowthPeriod, Metric, Window};
use crate::importer::DuplicatePolicy;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// tka - TikTok export import & analytics
#[derive(Parser, Debug)]
#[command(name = "tka")]
#[command(author = "Jeffrey Emanuel <jeff@jeffreyemanuel.dev>")]
#[command(version)]
#[command(about = "Fast CLI for importing and analyzing TikTok data exports")]
#[command(long_about = r#"
tka - A command-line tool for importing TikTok JSON data exports and
tracking post, follower, and following history over time.

Features:
  - Imports both export shapes (legacy post lists and full data exports)
  - Duplicate-safe re-imports with skip/update/clear policies
  - Multi-export history diffing (followers gained/lost between exports)
  - Trend, keyword, engagement, and growth analytics
  - SQLite storage, JSON and human-readable output

Quick start:
  1. Download your TikTok data from tiktok.com/setting (JSON format)
  2. Run: tka user add admin
  3. Run: tka import user_data.json
  4. Explore: tka trends, tka followers stats, tka keywords
"#)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, env = "TKA_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Be verbose (show debug info)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Be quiet (suppress non-error output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import a TikTok JSON export (posts, followers, following)
    Import(ImportArgs),

    /// Analyze multiple exports to track follower history over time
    History(HistoryArgs),

    /// Likes/views trends over time
    Trends(TrendsArgs),

    /// Top posts per recent time period
    TopPosts(TopPostsArgs),

    /// Keyword frequency across post titles
    Keywords(KeywordsArgs),

    /// Posts ranked by engagement per day
    Engagement(EngagementArgs),

    /// Follower/following reports (stats, mutuals, growth, ...)
    Followers(FollowersArgs),

    /// Show overall store statistics
    Stats,

    /// Manage users that own follower data
    User(UserArgs),

    /// Show or manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Path to the TikTok JSON export file
    pub json_file: PathBuf,

    /// Username to associate follower data with
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// Validate without importing (guaranteed rollback)
    #[arg(long)]
    pub dry_run: bool,

    /// Delete all existing data of the affected kinds before import
    #[arg(long)]
    pub clear_existing: bool,

    /// Import only posts
    #[arg(long, conflicts_with = "followers_only")]
    pub posts_only: bool,

    /// Import only followers/following
    #[arg(long)]
    pub followers_only: bool,

    /// How re-imported records interact with existing rows
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Paths to TikTok JSON export files (any order; sorted by date)
    #[arg(required = true)]
    pub json_files: Vec<PathBuf>,

    /// Username to associate snapshots with
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// Analyze without importing snapshots
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct TrendsArgs {
    /// Bucket granularity
    #[arg(long, short = 'g', value_enum, default_value = "day")]
    pub grouping: GroupingArg,

    /// Days to look back
    #[arg(long, short = 'd', default_value = "30")]
    pub days: i64,
}

#[derive(Args, Debug)]
pub struct TopPostsArgs {
    /// Time window for grouping
    #[arg(long, short = 'w', value_enum, default_value = "weekly")]
    pub window: WindowArg,

    /// Number of top posts per window
    #[arg(long, short = 'n', default_value = "5")]
    pub limit: usize,

    /// Ranking metric
    #[arg(long, short = 'm', value_enum, default_value = "likes")]
    pub metric: MetricArg,
}

#[derive(Args, Debug)]
pub struct KeywordsArgs {
    /// Number of top keywords
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,

    /// Minimum word length
    #[arg(long, default_value = "3")]
    pub min_length: usize,
}

#[derive(Args, Debug)]
pub struct EngagementArgs {
    /// Number of posts to return
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct FollowersArgs {
    /// Which report to produce
    #[arg(default_value = "stats")]
    pub report: FollowerReport,

    /// Username whose follower data to analyze
    #[arg(long, short = 'u')]
    pub user: Option<String>,

    /// Page number for listing reports (1-based)
    #[arg(long, default_value = "1")]
    pub page: usize,

    /// Page size for listing reports
    #[arg(long, default_value = "100")]
    pub page_size: usize,

    /// Lookback period for the growth report
    #[arg(long, value_enum, default_value = "month")]
    pub period: PeriodArg,
}

#[derive(Args, Debug)]
pub struct UserArgs {
    #[command(subcommand)]
    pub command: UserCommand,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Create a user
    Add {
        /// Username to create
        username: String,
    },
    /// List all users
    List,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Write a default config file to the standard location
    #[arg(long)]
    pub init: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum PolicyArg {
    #[default]
    Skip,
    Update,
    ClearThenImport,
}

impl From<PolicyArg> for DuplicatePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Skip => Self::Skip,
            PolicyArg::Update => Self::Update,
            PolicyArg::ClearThenImport => Self::ClearThenImport,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum GroupingArg {
    #[default]
    Day,
    Week,
    Month,
}

impl From<GroupingArg> for Grouping {
    fn from(arg: GroupingArg) -> Self {
        match arg {
            GroupingArg::Day => Self::Day,
            GroupingArg::Week => Self::Week,
            GroupingArg::Month => Self::Month,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum WindowArg {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl From<WindowArg> for Window {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::Daily => Self::Daily,
            WindowArg::Weekly => Self::Weekly,
            WindowArg::Monthly => Self::Monthly,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum MetricArg {
    #[default]
    Likes,
    Views,
    Engagement,
}

impl From<MetricArg> for Metric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Likes => Self::Likes,
            MetricArg::Views => Self::Views,
            MetricArg::Engagement => Self::Engagement,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum PeriodArg {
    Week,
    #[default]
    Month,
    Year,
    All,
}

impl From<PeriodArg> for GrowthPeriod {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::Week => Self::Week,
            PeriodArg::Month => Self::Month,
            PeriodArg::Year => Self::Year,
            PeriodArg::All => Self::All,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FollowerReport {
    #[default]
    Stats,
    Mutuals,
    FollowersOnly,
    FollowingOnly,
    Growth,
}

impl FollowerReport {
    /// The comparison listing this report maps to, if it is one.
    #[must_use]
    pub const fn comparison_kind(self) -> Option<ComparisonKind> {
        match self {
            Self::Mutuals => Some(ComparisonKind::Mutuals),
            Self::FollowersOnly => Some(ComparisonKind::FollowersOnly),
            Self::FollowingOnly => Some(ComparisonKind::FollowingOnly),
            Self::Stats | Self::Growth => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_import_flags() {
        let cli = Cli::try_parse_from([
            "tka",
            "import",
            "export.json",
            "--dry-run",
            "--policy",
            "update",
            "--user",
            "creator",
        ])
        .unwrap();

        match cli.command {
            Commands::Import(args) => {
                assert!(args.dry_run);
                assert_eq!(args.user.as_deref(), Some("creator"));
                assert!(matches!(args.policy, Some(PolicyArg::Update)));
            }
            _ => panic!("expected import command"),
        }
    }

    #[test]
    fn cli_rejects_conflicting_only_flags() {
        let result = Cli::try_parse_from([
            "tka",
            "import",
            "export.json",
            "--posts-only",
            "--followers-only",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn history_requires_at_least_one_file() {
        assert!(Cli::try_parse_from(["tka", "history"]).is_err());
        assert!(Cli::try_parse_from(["tka", "history", "a.json", "b.json"]).is_ok());
    }

    #[test]
    fn followers_report_defaults_to_stats() {
        let cli = Cli::try_parse_from(["tka", "followers"]).unwrap();
        match cli.command {
            Commands::Followers(args) => {
                assert_eq!(args.report, FollowerReport::Stats);
                assert!(args.report.comparison_kind().is_none());
            }
            _ => panic!("expected followers command"),
        }
    }
}
