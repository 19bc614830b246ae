//! postflow-queue - Review and manage queued posts
//!
//! Unix-style operator tool for the review, scheduling and dispatch queue.

use chrono::Utc;
use clap::{Parser, Subcommand};
use libpostflow::dispatcher::DispatchReport;
use libpostflow::logging::{LogFormat, LoggingConfig};
use libpostflow::review::{ApproveRequest, ScheduleRequest};
use libpostflow::scheduling::{format_timestamp, parse_schedule};
use libpostflow::service::PostflowService;
use libpostflow::{Config, Post, PostState, PostflowError, Result, SettingsStore};

#[derive(Parser, Debug)]
#[command(name = "postflow-queue")]
#[command(version)]
#[command(about = "Review and manage queued posts")]
#[command(long_about = "\
postflow-queue - Review and manage queued posts

DESCRIPTION:
    postflow-queue is a Unix-style tool for operators of the Postflow queue.
    Use it to review drafts, schedule approved posts, inspect dispatch
    results and re-dispatch posts whose platforms partly failed.

COMMANDS:
    list        List posts, optionally filtered by state
    show        Show one post with its platform results and history
    submit      Send a draft to review
    approve     Approve a post for one or more platforms
    reject      Reject a post under review
    schedule    Set or change the publish time of an approved post
    redispatch  Retry the failed platforms of a partially failed post
    stats       Count posts per state

USAGE EXAMPLES:
    # Posts waiting for review
    postflow-queue list --state pending_review

    # Approve and schedule in one step
    postflow-queue approve <POST_ID> --platforms facebook,instagram --at \"tomorrow 10am\"

    # Move a scheduled post
    postflow-queue schedule <POST_ID> +2h

    # Reject with a reason kept in the audit trail
    postflow-queue reject <POST_ID> --reason \"off brand\"

CONFIGURATION:
    Configuration file: ~/.config/postflow/config.toml
    Database location: ~/.local/share/postflow/posts.db

    Override with environment variables:
        POSTFLOW_CONFIG    - Path to config file
        POSTFLOW_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (unknown post, bad time, transition not allowed)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List posts, newest first
    List {
        /// Only posts in this state (e.g. scheduled, pending_review)
        #[arg(short, long)]
        state: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Maximum number of posts
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Show one post
    Show {
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Send a draft to review
    Submit { post_id: String },

    /// Approve a post
    Approve {
        post_id: String,

        /// Comma-separated target platforms
        #[arg(short, long, value_delimiter = ',', required = true)]
        platforms: Vec<String>,

        /// Schedule right away (e.g. "2025-06-01T10:00:00Z", "+2h", "tomorrow 10am")
        #[arg(long)]
        at: Option<String>,
    },

    /// Reject a post under review
    Reject {
        post_id: String,

        /// Reason, kept in the audit trail
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Schedule an approved post, or move a scheduled one
    Schedule {
        post_id: String,

        /// Publish time (e.g. "2025-06-01T10:00:00Z", "+2h", "tomorrow 10am")
        time: String,

        /// Replace the approved platforms
        #[arg(short, long, value_delimiter = ',')]
        platforms: Option<Vec<String>>,
    },

    /// Retry the failed platforms of a partially failed post
    Redispatch { post_id: String },

    /// Count posts per state
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(LogFormat::Text, "error".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default()?;
    let service = PostflowService::from_config(config, SettingsStore::from_env()).await?;

    match cli.command {
        Commands::List {
            state,
            format,
            limit,
        } => cmd_list(&service, state.as_deref(), &format, limit).await,
        Commands::Show { post_id, format } => cmd_show(&service, &post_id, &format).await,
        Commands::Submit { post_id } => {
            let post = service.drafts().submit(&post_id, now()).await?;
            print_state(&post);
            Ok(())
        }
        Commands::Approve {
            post_id,
            platforms,
            at,
        } => cmd_approve(&service, &post_id, platforms, at.as_deref()).await,
        Commands::Reject { post_id, reason } => {
            let post = service.review().reject(&post_id, reason, now()).await?;
            print_state(&post);
            Ok(())
        }
        Commands::Schedule {
            post_id,
            time,
            platforms,
        } => cmd_schedule(&service, &post_id, &time, platforms).await,
        Commands::Redispatch { post_id } => cmd_redispatch(&service, &post_id).await,
        Commands::Stats { format } => cmd_stats(&service, &format).await,
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(PostflowError::Validation(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn resolve_time(time: &str) -> Result<i64> {
    Ok(parse_schedule(time, Utc::now())?.timestamp())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PostflowError::Validation(format!("Could not encode output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// `<id> <state>` on stdout, for chaining
fn print_state(post: &Post) {
    println!("{} {}", post.id, post.state);
}

async fn cmd_list(
    service: &PostflowService,
    state: Option<&str>,
    format: &str,
    limit: usize,
) -> Result<()> {
    validate_format(format)?;
    let state = state
        .map(str::parse::<PostState>)
        .transpose()
        .map_err(PostflowError::Validation)?;

    let posts = service.list_posts(state, limit).await?;

    if format == "json" {
        return print_json(&posts);
    }

    let now = now();
    for post in &posts {
        let when = post
            .scheduled_at
            .map(|ts| format_time_until(now, ts))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} | {} | {} | {}",
            post.id,
            post.state,
            truncate_content(&post.content, 50),
            when
        );
    }
    Ok(())
}

async fn cmd_show(service: &PostflowService, post_id: &str, format: &str) -> Result<()> {
    validate_format(format)?;
    let post = service.get_post(post_id).await?;
    let history = service.history(post_id).await?;

    if format == "json" {
        return print_json(&serde_json::json!({
            "post": post,
            "history": history,
        }));
    }

    println!("id:        {}", post.id);
    println!("state:     {}", post.state);
    println!("content:   {}", post.content);
    if let Some(image) = &post.image_url {
        println!("image:     {}", image);
    }
    if !post.target_platforms.is_empty() {
        let platforms: Vec<&str> = post.target_platforms.iter().map(String::as_str).collect();
        println!("platforms: {}", platforms.join(", "));
    }
    if let Some(at) = post.scheduled_at {
        println!("scheduled: {}", format_timestamp(at));
    }

    if !post.platform_results.is_empty() {
        println!("results:");
        for (platform, result) in &post.platform_results {
            let mut line = format!(
                "  {} {} (attempts: {})",
                platform, result.status, result.attempt_count
            );
            if let Some(id) = &result.platform_post_id {
                line.push_str(&format!(" id={}", id));
            }
            if let Some(error) = &result.error {
                let kind = if result.retryable == Some(true) {
                    "retryable"
                } else {
                    "permanent"
                };
                line.push_str(&format!(" {}: {}", kind, error));
            }
            println!("{}", line);
        }
    }

    if !history.is_empty() {
        println!("history:");
        for record in &history {
            let reason = record
                .reason
                .as_deref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default();
            println!(
                "  {} {} -> {}{}",
                format_timestamp(record.at),
                record.from,
                record.to,
                reason
            );
        }
    }
    Ok(())
}

async fn cmd_approve(
    service: &PostflowService,
    post_id: &str,
    platforms: Vec<String>,
    at: Option<&str>,
) -> Result<()> {
    let scheduled_at = at.map(resolve_time).transpose()?;
    let post = service
        .review()
        .approve(
            post_id,
            ApproveRequest {
                target_platforms: platforms,
                scheduled_at,
            },
            now(),
        )
        .await?;
    print_state(&post);
    Ok(())
}

async fn cmd_schedule(
    service: &PostflowService,
    post_id: &str,
    time: &str,
    platforms: Option<Vec<String>>,
) -> Result<()> {
    let post = service
        .review()
        .schedule(
            post_id,
            ScheduleRequest {
                scheduled_at: resolve_time(time)?,
                target_platforms: platforms,
            },
            now(),
        )
        .await?;
    print_state(&post);
    if let Some(at) = post.scheduled_at {
        eprintln!("Scheduled for {}", format_timestamp(at));
    }
    Ok(())
}

async fn cmd_redispatch(service: &PostflowService, post_id: &str) -> Result<()> {
    let report = service.dispatcher().redispatch(post_id, now()).await?;
    print_report(&report);

    if report.state == PostState::Posted {
        Ok(())
    } else {
        Err(PostflowError::Platform(
            libpostflow::error::PlatformError::Posting(format!(
                "{} platform(s) still failing: {}",
                report.failed.len(),
                report.failed.join(", ")
            )),
        ))
    }
}

fn print_report(report: &DispatchReport) {
    println!("{} {}", report.post_id, report.state);
    for (platform, result) in &report.results {
        match &result.error {
            Some(error) => println!("  {} {}: {}", platform, result.status, error),
            None => println!("  {} {}", platform, result.status),
        }
    }
}

async fn cmd_stats(service: &PostflowService, format: &str) -> Result<()> {
    validate_format(format)?;
    let counts = service.stats().await?;

    if format == "json" {
        let json: serde_json::Map<String, serde_json::Value> = PostState::ALL
            .iter()
            .map(|state| {
                let count = counts.get(state).copied().unwrap_or(0);
                (state.to_string(), serde_json::Value::from(count))
            })
            .collect();
        return print_json(&json);
    }

    for state in PostState::ALL {
        println!("{:<16} {}", state.as_str(), counts.get(&state).copied().unwrap_or(0));
    }
    Ok(())
}

/// Truncate content to `max_chars` characters with ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let truncated: String = single_line.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// Human-readable time until `scheduled_at`
fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_content_counts_characters() {
        assert_eq!(truncate_content("corto", 10), "corto");
        assert_eq!(truncate_content("ñañañañaña", 4), "ñaña...");
        assert_eq!(truncate_content("a\nb", 10), "a b");
    }

    #[test]
    fn test_format_time_until() {
        assert_eq!(format_time_until(1000, 900), "overdue");
        assert_eq!(format_time_until(0, 30), "in <1 minute");
        assert_eq!(format_time_until(0, 60), "in 1 minute");
        assert_eq!(format_time_until(0, 7200), "in 2 hours");
        assert_eq!(format_time_until(0, 86_400 * 3), "in 3 days");
    }
}
