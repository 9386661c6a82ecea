//! tka - TikTok export import & analytics CLI
//!
//! Main entry point for the tka command-line tool.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use tka::analytics::{
    ComparisonReport, EngagementReport, FollowerStatsReport, GrowthReport, KeywordQuery,
    KeywordReport, Page, TopPostsQuery, TopPostsReport, TrendQuery, TrendReport,
};
use tka::config::Config;
use tka::history::{self, ExportSnapshot};
use tka::importer::{self, ImportOptions, ImportReport, KindSummary, VERBOSE_ERROR_LIMIT};
use tka::logging::init_cli_logging;
use tka::*;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_cli_logging(cli.quiet, cli.verbose);

    let config = Config::load();

    match &cli.command {
        Commands::Import(args) => cmd_import(&cli, &config, args),
        Commands::History(args) => cmd_history(&cli, &config, args),
        Commands::Trends(args) => cmd_trends(&cli, &config, args),
        Commands::TopPosts(args) => cmd_top_posts(&cli, &config, args),
        Commands::Keywords(args) => cmd_keywords(&cli, &config, args),
        Commands::Engagement(args) => cmd_engagement(&cli, &config, args),
        Commands::Followers(args) => cmd_followers(&cli, &config, args),
        Commands::Stats => cmd_stats(&cli, &config),
        Commands::User(args) => cmd_user(&cli, &config, args),
        Commands::Config(args) => cmd_config(&cli, &config, args),
        Commands::Completions(args) => cmd_completions(args.clone()),
    }
}

fn get_db_path(cli: &Cli, config: &Config) -> PathBuf {
    cli.db.clone().unwrap_or_else(|| config.db_path())
}

fn resolve_user(arg: Option<&str>, config: &Config) -> String {
    arg.map_or_else(|| config.import.default_user.clone(), String::from)
}

/// Read and deserialize one export file. Fatal on missing files and
/// malformed JSON; nothing has been touched yet at this point.
fn read_export(path: &Path) -> Result<ExportDocument> {
    if !path.exists() {
        return Err(TkaError::export_not_found(path).into());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| TkaError::path_error("read", path, e))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| TkaError::parse_error(path.display().to_string(), e.to_string()))?;

    Ok(ExportDocument::from_value(value)?)
}

fn file_mtime(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_or_else(|_| Utc::now(), DateTime::<Utc>::from)
}

/// Serialize a report as JSON if the output format asks for it.
/// Returns false when the caller should render text instead.
fn emit_json<T: Serialize>(cli: &Cli, value: &T) -> Result<bool> {
    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(value)?);
            Ok(true)
        }
        OutputFormat::JsonPretty => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(true)
        }
        OutputFormat::Text => Ok(false),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        // Find a valid UTF-8 char boundary to avoid panic on multi-byte chars
        let mut end = max_len.saturating_sub(3);
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

// =============================================================================
// Import
// =============================================================================

fn text_output(cli: &Cli) -> bool {
    matches!(cli.format, OutputFormat::Text) && !cli.quiet
}

fn cmd_import(cli: &Cli, config: &Config, args: &cli::ImportArgs) -> Result<()> {
    let db_path = get_db_path(cli, config);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if text_output(cli) {
        println!("{}", "Reading export...".bold().cyan());
        println!("  File: {}", args.json_file.display());
        println!("  Database: {}", db_path.display());
    }

    let document = read_export(&args.json_file)?;

    let options = ImportOptions {
        user: resolve_user(args.user.as_deref(), config),
        policy: args.policy.map_or(config.import.policy, Into::into),
        dry_run: args.dry_run,
        clear_existing: args.clear_existing,
        posts_only: args.posts_only,
        followers_only: args.followers_only,
    };
    info!(
        "Importing as user '{}' with policy '{}'",
        options.user, options.policy
    );

    let mut storage = Storage::open(&db_path)?;

    let pb = if cli.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(if args.dry_run {
        "Validating export (dry run)..."
    } else {
        "Reconciling export..."
    });
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let report = importer::import_document(&mut storage, &document, &options)?;
    pb.finish_and_clear();

    if emit_json(cli, &report)? {
        return Ok(());
    }
    print_import_summary(&report);
    Ok(())
}

fn print_kind_summary(label: &str, summary: &KindSummary, dry_run: bool) {
    if summary.total == 0 {
        return;
    }

    println!("\n{}", label.bold());
    let created_label = if dry_run { "Would create:" } else { "Created:" };
    println!("  {} {:>8}", created_label.green(), format_number_usize(summary.created));
    if summary.updated > 0 {
        let updated_label = if dry_run { "Would update:" } else { "Updated:" };
        println!("  {} {:>8}", updated_label.cyan(), format_number_usize(summary.updated));
    }
    println!("  {} {:>8}", "Skipped:".yellow(), format_number_usize(summary.skipped));
    if summary.errored > 0 {
        println!("  {} {:>8}", "Errors:".red(), format_number_usize(summary.errored));
        for err in importer::verbose_errors(summary, VERBOSE_ERROR_LIMIT) {
            println!("    {} record #{}: {}", "✗".red(), err.index + 1, err.message);
        }
        if summary.errored > VERBOSE_ERROR_LIMIT {
            println!(
                "    (showing first {} of {} errors)",
                VERBOSE_ERROR_LIMIT, summary.errored
            );
        }
    }
    println!("  Total: {:>10}", format_number_usize(summary.total));
}

fn print_import_summary(report: &ImportReport) {
    println!();
    println!("{}", "═".repeat(HEADER_DIVIDER_WIDTH));
    println!("{}", "IMPORT SUMMARY".bold().cyan());
    println!("{}", "═".repeat(HEADER_DIVIDER_WIDTH));

    let cleared = report.cleared_posts + report.cleared_followers + report.cleared_following;
    if cleared > 0 {
        let verb = if report.dry_run { "Would clear" } else { "Cleared" };
        println!(
            "\n{} {verb} {} posts, {} followers, {} following",
            "⚠".yellow(),
            format_number_usize(report.cleared_posts),
            format_number_usize(report.cleared_followers),
            format_number_usize(report.cleared_following),
        );
    }

    print_kind_summary("POSTS", &report.posts, report.dry_run);
    print_kind_summary("FOLLOWERS", &report.followers, report.dry_run);
    print_kind_summary("FOLLOWING", &report.following, report.dry_run);

    if let Some(snapshot) = &report.snapshot {
        println!(
            "\n{} Snapshot for {}: {} followers, {} following",
            "✓".green(),
            snapshot.snapshot_date.format("%Y-%m-%d"),
            format_number(snapshot.follower_count),
            format_number(snapshot.following_count),
        );
    }

    println!("{}", "═".repeat(HEADER_DIVIDER_WIDTH));

    if report.dry_run {
        println!("{}", "Dry run — no data was imported (rolled back).".yellow().bold());
        println!("Run without --dry-run to import.");
    } else {
        let total_created =
            report.posts.created + report.followers.created + report.following.created;
        println!(
            "{}",
            format!("Import complete. {} records created.", format_number_usize(total_created))
                .green()
                .bold()
        );
    }
}

// =============================================================================
// History
// =============================================================================

fn cmd_history(cli: &Cli, config: &Config, args: &cli::HistoryArgs) -> Result<()> {
    let db_path = get_db_path(cli, config);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let user_name = resolve_user(args.user.as_deref(), config);

    if text_output(cli) {
        println!(
            "{}",
            format!("Analyzing {} exports for history tracking", args.json_files.len())
                .bold()
                .cyan()
        );
    }

    let mut snapshots = Vec::with_capacity(args.json_files.len());
    for (i, path) in args.json_files.iter().enumerate() {
        if text_output(cli) {
            println!(
                "  Reading file {}/{}: {}",
                i + 1,
                args.json_files.len(),
                path.display()
            );
        }
        let document = read_export(path)
            .with_context(|| format!("while reading {}", path.display()))?;

        let source = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let snapshot = ExportSnapshot::from_document(&document, source, file_mtime(path));
        if text_output(cli) {
            println!(
                "    {} Date: {}, Followers: {}, Following: {}",
                "✓".green(),
                snapshot.date.format("%Y-%m-%d %H:%M"),
                format_number_usize(snapshot.follower_count()),
                format_number_usize(snapshot.following_count()),
            );
        }
        snapshots.push(snapshot);
    }

    // Sorted ascending by date is the differ's precondition.
    history::sort_snapshots(&mut snapshots);
    let analysis = history::analyze(&snapshots);

    let mut storage = Storage::open(&db_path)?;
    let user = storage.require_user(&user_name)?;

    if !args.dry_run {
        let session = storage.import_session()?;
        let created = history::apply(&session, user.id, &analysis)?;
        session.finish(true)?;
        info!("Imported {} new snapshots", created);
    }

    if emit_json(cli, &analysis)? {
        return Ok(());
    }
    print_history_analysis(&analysis);

    if args.dry_run {
        println!("\n{}", "Dry run — no snapshots imported.".yellow().bold());
    } else {
        println!(
            "\n{}",
            format!("Imported {} snapshots.", analysis.snapshots.len()).green().bold()
        );
    }
    Ok(())
}

fn print_history_analysis(analysis: &history::HistoryAnalysis) {
    println!("\n{}", "SNAPSHOTS".bold());
    for snapshot in &analysis.snapshots {
        println!(
            "\n  {} — {}",
            snapshot.date.format("%Y-%m-%d %H:%M"),
            snapshot.source.dimmed()
        );
        println!(
            "    Followers: {} ({} gained, {} lost)",
            format_number_usize(snapshot.follower_count),
            format_signed(i64::try_from(snapshot.gained_followers.len()).unwrap_or(i64::MAX)),
            format_signed(i64::try_from(snapshot.lost_followers.len()).unwrap_or(i64::MAX)),
        );
        println!(
            "    Following: {} ({} gained, {} lost)",
            format_number_usize(snapshot.following_count),
            format_signed(i64::try_from(snapshot.gained_following.len()).unwrap_or(i64::MAX)),
            format_signed(i64::try_from(snapshot.lost_following.len()).unwrap_or(i64::MAX)),
        );
    }

    if analysis.changes.is_empty() {
        return;
    }

    println!("\n{}", "═".repeat(HEADER_DIVIDER_WIDTH));
    println!("{}", "GROWTH ANALYSIS".bold().cyan());

    let first = &analysis.snapshots[0];
    let last = &analysis.snapshots[analysis.snapshots.len() - 1];
    println!(
        "\n  Total follower growth: {} ({} → {})",
        format_signed(analysis.net_follower_growth()).bold(),
        format_number_usize(first.follower_count),
        format_number_usize(last.follower_count),
    );
    println!(
        "  Total following growth: {} ({} → {})",
        format_signed(analysis.net_following_growth()),
        format_number_usize(first.following_count),
        format_number_usize(last.following_count),
    );
    println!(
        "  Ever gained: {}   Ever lost: {}",
        format_number_usize(analysis.total_gained.len()).green(),
        format_number_usize(analysis.total_lost.len()).red(),
    );

    println!("\n{}", "═".repeat(HEADER_DIVIDER_WIDTH));
    println!("{}", "PERIOD CHANGES".bold().cyan());

    for (i, change) in analysis.changes.iter().enumerate() {
        let days_between = (change.to_date - change.from_date).num_days();
        println!(
            "\n  Period {}: {} → {} ({} days)",
            i + 1,
            change.from_date.format("%Y-%m-%d"),
            change.to_date.format("%Y-%m-%d"),
            days_between,
        );
        println!(
            "    Followers: {} (+{} gained, -{} lost)",
            format_signed(change.net_followers),
            change.followers_gained.len(),
            change.followers_lost.len(),
        );
        if !change.followers_gained.is_empty() && change.followers_gained.len() <= 10 {
            println!("       New: {}", change.followers_gained.join(", ").green());
        }
        if !change.followers_lost.is_empty() && change.followers_lost.len() <= 10 {
            println!("       Lost: {}", change.followers_lost.join(", ").red());
        }
        println!(
            "    Following: {} (+{} gained, -{} lost)",
            format_signed(change.net_following),
            change.following_gained.len(),
            change.following_lost.len(),
        );
    }
}

// =============================================================================
// Analytics
// =============================================================================

fn cmd_trends(cli: &Cli, config: &Config, args: &cli::TrendsArgs) -> Result<()> {
    let storage = Storage::open_existing(get_db_path(cli, config))?;
    let report = TrendReport::compute(
        &storage,
        &TrendQuery {
            grouping: args.grouping.into(),
            days: args.days,
        },
        Utc::now(),
    )?;

    if emit_json(cli, &report)? {
        return Ok(());
    }

    println!(
        "{}",
        format!("Trends — last {} days by {:?}", report.days, args.grouping)
            .bold()
            .cyan()
    );
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    if report.data.is_empty() {
        println!("{}", "No posts in this window.".yellow());
        return Ok(());
    }
    for point in &report.data {
        println!(
            "  {}  posts: {:>4}  likes: {:>8} (avg {:>8.2})  views: {:>10} (avg {:>10.2})",
            point.date,
            point.post_count,
            format_number(point.total_likes),
            point.avg_likes,
            format_number(point.total_views),
            point.avg_views,
        );
    }
    Ok(())
}

fn cmd_top_posts(cli: &Cli, config: &Config, args: &cli::TopPostsArgs) -> Result<()> {
    let storage = Storage::open_existing(get_db_path(cli, config))?;
    let report = TopPostsReport::compute(
        &storage,
        &TopPostsQuery {
            window: args.window.into(),
            limit: args.limit,
            metric: args.metric.into(),
        },
    )?;

    if emit_json(cli, &report)? {
        return Ok(());
    }

    println!(
        "{}",
        format!("Top posts by {:?} ({:?} windows)", args.metric, args.window)
            .bold()
            .cyan()
    );
    for period in &report.data {
        println!("\n{}", period.period_label.bold());
        if period.top_posts.is_empty() {
            println!("  {}", "no posts".dimmed());
            continue;
        }
        for (i, post) in period.top_posts.iter().enumerate() {
            println!(
                "  {}. {} {}",
                i + 1,
                truncate(&post.title, 60),
                format!(
                    "({} likes, {} views, {} engagement)",
                    format_number(post.likes),
                    post.views.map_or_else(|| "-".to_string(), format_number),
                    format_number(post.total_engagement()),
                )
                .dimmed(),
            );
        }
    }
    Ok(())
}

fn cmd_keywords(cli: &Cli, config: &Config, args: &cli::KeywordsArgs) -> Result<()> {
    let storage = Storage::open_existing(get_db_path(cli, config))?;
    let report = KeywordReport::compute(
        &storage,
        &KeywordQuery {
            limit: args.limit,
            min_length: args.min_length,
        },
    )?;

    if emit_json(cli, &report)? {
        return Ok(());
    }

    println!("{}", "Keyword frequency".bold().cyan());
    println!(
        "  {} total words, {} unique",
        format_number_usize(report.total_words),
        format_number_usize(report.unique_words)
    );
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    for (i, keyword) in report.keywords.iter().enumerate() {
        println!(
            "  {:>3}. {:<24} {:>6}  {:>6.2}%",
            i + 1,
            keyword.word,
            format_number_usize(keyword.count),
            keyword.percentage,
        );
    }
    Ok(())
}

fn cmd_engagement(cli: &Cli, config: &Config, args: &cli::EngagementArgs) -> Result<()> {
    let storage = Storage::open_existing(get_db_path(cli, config))?;
    let report = EngagementReport::compute(&storage, args.limit, Utc::now())?;

    if emit_json(cli, &report)? {
        return Ok(());
    }

    println!("{}", "Engagement per day since posting".bold().cyan());
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    for (i, entry) in report.posts.iter().enumerate() {
        println!(
            "  {:>3}. {:<50} {:>8.2}/day {}",
            i + 1,
            truncate(&entry.post.title, 50),
            entry.engagement_per_day,
            format!(
                "({} total, {}d old)",
                format_number(entry.total_engagement),
                entry.days_since_post
            )
            .dimmed(),
        );
    }
    Ok(())
}

fn cmd_followers(cli: &Cli, config: &Config, args: &cli::FollowersArgs) -> Result<()> {
    let storage = Storage::open_existing(get_db_path(cli, config))?;
    let user = storage.require_user(&resolve_user(args.user.as_deref(), config))?;

    if let Some(kind) = args.report.comparison_kind() {
        let page = Page {
            number: args.page.max(1),
            size: args.page_size.max(1),
        };
        let report = ComparisonReport::compute(&storage, user.id, kind, page)?;

        if emit_json(cli, &report)? {
            return Ok(());
        }

        println!(
            "{}",
            format!(
                "{:?} for @{} — {} total (page {} of size {})",
                args.report, user.username, report.total_count, report.page, report.page_size
            )
            .bold()
            .cyan()
        );
        println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
        for entry in &report.results {
            let followed = entry
                .date_followed
                .map_or_else(|| "—".to_string(), |d| d.format("%Y-%m-%d").to_string());
            let following = entry
                .date_following
                .map_or_else(|| "—".to_string(), |d| d.format("%Y-%m-%d").to_string());
            println!(
                "  @{:<28} followed: {}  following: {}",
                entry.username, followed, following
            );
        }
        return Ok(());
    }

    if matches!(args.report, FollowerReport::Growth) {
        let report =
            GrowthReport::compute(&storage, user.id, args.period.into(), Utc::now())?;

        if emit_json(cli, &report)? {
            return Ok(());
        }

        println!(
            "{}",
            format!("Growth for @{} ({:?})", user.username, args.period).bold().cyan()
        );
        println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
        if report.growth.is_empty() {
            println!("{}", "No snapshots in this period.".yellow());
            return Ok(());
        }
        for point in &report.growth {
            println!(
                "  {}  followers: {:>7} ({} / {})  following: {:>7} ({} / {})",
                point.date.format("%Y-%m-%d"),
                format_number(point.follower_count),
                format_signed(point.followers_gained).green(),
                format_signed(-point.followers_lost).red(),
                format_number(point.following_count),
                format_signed(point.following_gained).green(),
                format_signed(-point.following_lost).red(),
            );
        }
        return Ok(());
    }

    let report = FollowerStatsReport::compute(&storage, user.id, Utc::now())?;

    if emit_json(cli, &report)? {
        return Ok(());
    }

    println!("{}", format!("Follower stats for @{}", user.username).bold().cyan());
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    println!("  {:<22} {:>10}", "Followers:", format_number_usize(report.total_followers));
    println!("  {:<22} {:>10}", "Following:", format_number_usize(report.total_following));
    println!("  {:<22} {:>10}", "Mutuals:", format_number_usize(report.mutuals_count));
    println!(
        "  {:<22} {:>10}",
        "Followers only:",
        format_number_usize(report.followers_only_count)
    );
    println!(
        "  {:<22} {:>10}",
        "Following only:",
        format_number_usize(report.following_only_count)
    );
    println!(
        "  {:<22} {:>10}",
        "Follower ratio:",
        report
            .follower_ratio
            .map_or_else(|| "—".to_string(), |r| format!("{r:.2}"))
    );
    println!(
        "  {:<22} {:>10}",
        "Gained (7d):",
        format_number(report.weekly_growth.followers)
    );
    println!(
        "  {:<22} {:>10}",
        "Gained (30d):",
        format_number(report.monthly_growth.followers)
    );

    if !report.top_acquisition_dates.is_empty() {
        println!("\n{}", "Top acquisition dates".bold());
        for date in &report.top_acquisition_dates {
            println!(
                "  {}  {} followers",
                date.date,
                format_number(date.followers_gained).green()
            );
        }
    }
    Ok(())
}

fn cmd_stats(cli: &Cli, config: &Config) -> Result<()> {
    let storage = Storage::open_existing(get_db_path(cli, config))?;
    let stats = storage.get_stats()?;

    if emit_json(cli, &stats)? {
        return Ok(());
    }

    println!("{}", "Store Statistics".bold().cyan());
    println!("{}", "─".repeat(40));
    println!("  {:<20} {:>10}", "Posts:", format_number(stats.posts_count));
    println!("  {:<20} {:>10}", "Followers:", format_number(stats.followers_count));
    println!("  {:<20} {:>10}", "Following:", format_number(stats.following_count));
    println!("  {:<20} {:>10}", "Snapshots:", format_number(stats.snapshots_count));
    println!("  {:<20} {:>10}", "Users:", format_number(stats.users_count));
    println!("{}", "─".repeat(40));

    if let (Some(first), Some(last)) = (stats.first_post_date, stats.last_post_date) {
        println!("  First post: {}", first.format("%Y-%m-%d").to_string().green());
        println!("  Last post:  {}", last.format("%Y-%m-%d").to_string().green());
    }
    Ok(())
}

// =============================================================================
// Users / config / completions
// =============================================================================

fn cmd_user(cli: &Cli, config: &Config, args: &cli::UserArgs) -> Result<()> {
    let db_path = get_db_path(cli, config);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let storage = Storage::open(&db_path)?;

    match &args.command {
        UserCommand::Add { username } => {
            let (user, created) = storage.ensure_user(username)?;
            if created {
                println!("{} Created user '{}'", "✓".green(), user.username.bold());
            } else {
                println!("User '{}' already exists", user.username.bold());
            }
        }
        UserCommand::List => {
            let users = storage.list_users()?;
            if emit_json(cli, &users)? {
                return Ok(());
            }
            if users.is_empty() {
                println!("{}", "No users yet. Run 'tka user add <name>'.".yellow());
                return Ok(());
            }
            for user in users {
                println!(
                    "  {}  {}",
                    user.username.bold(),
                    format!("created {}", format_relative_date(user.created_at)).dimmed()
                );
            }
        }
    }
    Ok(())
}

fn cmd_config(cli: &Cli, config: &Config, args: &cli::ConfigArgs) -> Result<()> {
    if args.init {
        config.save()?;
        if let Some(path) = Config::user_config_path() {
            println!("{} Wrote config to {}", "✓".green(), path.display());
        }
        return Ok(());
    }

    // Showing the effective configuration is the default; --show is an
    // explicit alias for it.
    println!("{}", "Current Configuration".bold().cyan());
    println!("  Database: {}", get_db_path(cli, config).display());
    println!("  Default user: {}", config.import.default_user);
    println!("  Duplicate policy: {}", config.import.policy);
    println!("  Output format: {}", config.output.format);
    if let Some(path) = Config::user_config_path() {
        println!("  Config file: {}", path.display());
    }
    Ok(())
}

fn cmd_completions(args: cli::CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    generate(args.shell, &mut cmd, "tka", &mut io::stdout());
    Ok(())
}
