//! as-playground CLI
//!
//! Works on the local comment database directly and drives a running host
//! over its control socket.
//!
//! Commands:
//! - asplay events
//! - asplay comments <event> [--from 00:10:00] [--to 00:20:00]
//! - asplay chapters <event>
//! - asplay analysis <event>
//! - asplay export <event> [--output file.json]
//! - asplay import <file.json>
//! - asplay clear <event> --yes
//! - asplay merge <event> <archive.json>
//! - asplay seek <time code> | asplay chapter-seek <event> <song>
//! - asplay host start|stop|status
//! - asplay config show|init

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};

use asplay_core::analysis::{comments_per_minute, peak_minute};
use asplay_core::backup::{export_event, import_backup, parse_backup, to_json};
use asplay_core::config::{asplay_dir, config_path, database_path};
use asplay_core::ipc::control_socket_path;
use asplay_core::timecode::{format_hh_mm_ss, parse_time_code};
use asplay_core::{
    extract_chapters, Chapter, Comment, CommentStore, ControlClient, HostConfig, MergeEngine,
    MergeOutcome, SqliteCommentStore, TIME_PRE_BROADCAST, TIME_UNKNOWN,
};

#[derive(Parser)]
#[command(name = "asplay")]
#[command(about = "Comment recorder and viewer companion for ASOBISTAGE")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List recorded events
    Events,

    /// List the comments of an event
    Comments {
        /// Event name
        event: String,

        /// Only comments at or after this position (HH:MM:SS, MM:SS or seconds)
        #[arg(long)]
        from: Option<String>,

        /// Only comments at or before this position
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of comments to show
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Show the song chapters of an event
    Chapters {
        /// Event name
        event: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show comments per minute of an event
    Analysis {
        /// Event name
        event: String,

        /// Width of the histogram bars
        #[arg(long, default_value = "40")]
        width: usize,
    },

    /// Export the comments of an event as JSON
    Export {
        /// Event name
        event: String,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Import an exported event, replacing its stored comments
    Import {
        /// Backup file
        file: PathBuf,
    },

    /// Delete all comments of an event
    Clear {
        /// Event name
        event: String,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Backfill live comments of an event from an archive recording
    Merge {
        /// Event name
        event: String,

        /// Exported archive comments of the same event (from `asplay export`)
        archive: PathBuf,
    },

    /// Move the player of the running host
    Seek {
        /// Position (HH:MM:SS, MM:SS or seconds)
        time: String,
    },

    /// Move the player of the running host to a song chapter
    ChapterSeek {
        /// Event name
        event: String,

        /// Song title (exact, or a unique part of it)
        song: String,
    },

    /// Host management
    Host {
        #[command(subcommand)]
        command: HostCommands,
    },

    /// Host configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum HostCommands {
    /// Start the host
    Start,

    /// Stop the host
    Stop,

    /// Check host status
    Status,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn open_store() -> Result<SqliteCommentStore> {
    let path = database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    SqliteCommentStore::open(&path).with_context(|| format!("Failed to open database at {:?}", path))
}

fn parse_position(text: &str) -> Result<i64> {
    parse_time_code(text).with_context(|| format!("Invalid time code: {:?}", text))
}

/// Resolve `--from`/`--to` into an inclusive range.
fn position_range(from: Option<&str>, to: Option<&str>) -> Result<Option<(i64, i64)>> {
    if from.is_none() && to.is_none() {
        return Ok(None);
    }
    let from = from.map(parse_position).transpose()?.unwrap_or(0);
    let to = to.map(parse_position).transpose()?.unwrap_or(i64::MAX);
    if from > to {
        bail!("--from is after --to");
    }
    Ok(Some((from, to)))
}

fn format_position(time_seconds: i64) -> String {
    match time_seconds {
        TIME_UNKNOWN => "--:--:--".to_string(),
        TIME_PRE_BROADCAST => "pre".to_string(),
        t => format_hh_mm_ss(t),
    }
}

fn format_comment(comment: &Comment) -> String {
    format!(
        "{} {} {}: {}",
        format_position(comment.time_seconds),
        comment.registered_date.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        comment.nickname,
        comment.comment
    )
}

/// Find a chapter by exact title, or by a part matching exactly one title.
fn find_chapter<'a>(chapters: &'a [Chapter], song: &str) -> Result<&'a Chapter> {
    if let Some(chapter) = chapters.iter().find(|c| c.name == song) {
        return Ok(chapter);
    }

    let matches: Vec<&Chapter> = chapters.iter().filter(|c| c.name.contains(song)).collect();
    match matches.as_slice() {
        [chapter] => Ok(chapter),
        [] => bail!("No chapter matches {:?}", song),
        _ => bail!(
            "{:?} matches several chapters: {}",
            song,
            matches.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Archive comments usable as a clock reference, in playback order.
fn archive_candidates(comments: Vec<Comment>) -> Vec<Comment> {
    let mut candidates: Vec<Comment> = comments
        .into_iter()
        .filter(Comment::has_known_time)
        .collect();
    candidates.sort_by_key(|c| c.time_seconds);
    candidates
}

fn histogram_bar(count: usize, max: usize, width: usize) -> String {
    if max == 0 {
        return String::new();
    }
    let len = (count * width).div_ceil(max);
    "#".repeat(len)
}

fn event_chapters(store: &dyn CommentStore, event: &str) -> Result<Vec<Chapter>> {
    let comments = store.comments_by_event(event)?;
    Ok(extract_chapters(&comments))
}

fn host_client() -> ControlClient {
    ControlClient::new()
}

fn exit_host_error(e: asplay_core::IpcError) -> ! {
    eprintln!("Failed to communicate with host: {}", e);
    eprintln!("Is the host running? Try: asplay host start");
    std::process::exit(1);
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Events => {
            let store = open_store()?;
            let events = store.event_names()?;
            if events.is_empty() {
                println!("No events recorded");
            }
            for event in events {
                let comments = store.comments_by_event(&event)?;
                let unknown = comments.iter().filter(|c| c.time_seconds == TIME_UNKNOWN).count();
                println!(
                    "{} ({} comments, {} without position)",
                    event,
                    comments.len(),
                    unknown
                );
            }
        }

        Commands::Comments {
            event,
            from,
            to,
            limit,
        } => {
            let store = open_store()?;
            let comments = match position_range(from.as_deref(), to.as_deref())? {
                Some((from, to)) => store.comments_in_time_range(&event, from, to)?,
                None => store.comments_by_event(&event)?,
            };

            if comments.is_empty() {
                println!("No comments found");
            }
            for comment in comments.iter().take(limit) {
                println!("{}", format_comment(comment));
            }
            if comments.len() > limit {
                println!("... {} more", comments.len() - limit);
            }
        }

        Commands::Chapters { event, json } => {
            let store = open_store()?;
            let chapters = event_chapters(&store, &event)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&chapters)?);
            } else if chapters.is_empty() {
                println!("No chapters found");
            } else {
                for chapter in &chapters {
                    println!(
                        "{} (seek {}) {}",
                        format_hh_mm_ss(chapter.time_seconds),
                        format_hh_mm_ss(chapter.seek_target()),
                        chapter.name
                    );
                }
            }
        }

        Commands::Analysis { event, width } => {
            let store = open_store()?;
            let comments = store.comments_by_event(&event)?;
            let buckets = comments_per_minute(&comments);

            let Some(peak) = peak_minute(&buckets) else {
                println!("No comments with a playback position");
                return Ok(());
            };

            for bucket in &buckets {
                println!(
                    "{} {:>5} {}",
                    bucket.label,
                    bucket.count,
                    histogram_bar(bucket.count, peak.count, width)
                );
            }
            println!("\nPeak: {} ({} comments)", peak.label, peak.count);
        }

        Commands::Export { event, output } => {
            let store = open_store()?;
            let backup = export_event(&store, &event)?;
            if backup.comments.is_empty() {
                eprintln!("Warning: event {:?} has no comments", event);
            }
            let json = to_json(&backup)?;

            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Exported {} comments to {}", backup.comments.len(), path.display());
                }
                None => println!("{}", json),
            }
        }

        Commands::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;

            let backup = match parse_backup(&json) {
                Ok(backup) => backup,
                Err(e) => {
                    eprintln!("Import rejected: {}", e);
                    std::process::exit(1);
                }
            };

            let store = open_store()?;
            let summary = import_backup(&store, &backup)?;
            println!(
                "Imported {} comments into {} (replaced {})",
                summary.imported, summary.event_name, summary.replaced
            );
        }

        Commands::Clear { event, yes } => {
            if !yes {
                eprintln!("Refusing to delete {:?} without --yes", event);
                std::process::exit(1);
            }
            let store = open_store()?;
            let removed = store.clear_event(&event)?;
            println!("Deleted {} comments of {}", removed, event);
        }

        Commands::Merge { event, archive } => {
            let json = std::fs::read_to_string(&archive)
                .with_context(|| format!("Failed to read {:?}", archive))?;
            let candidates = match parse_backup(&json) {
                Ok(backup) => archive_candidates(backup.comments),
                Err(e) => {
                    eprintln!("Archive file rejected: {}", e);
                    std::process::exit(1);
                }
            };

            let store = open_store()?;

            match MergeEngine::new().merge(&store, &event, &candidates) {
                Ok(MergeOutcome::Merged {
                    matched,
                    updated,
                    pre_broadcast,
                    strays,
                }) => {
                    println!("Merged {}:", event);
                    println!("  Matched: {}", matched);
                    println!("  Updated: {}", updated);
                    println!("  Before broadcast: {}", pre_broadcast);
                    println!("  Left unresolved: {}", strays);
                }
                Ok(MergeOutcome::NotMerged(reason)) => {
                    println!("Not merged: {}", reason);
                }
                Ok(MergeOutcome::Skipped) => {
                    println!("Another merge is running");
                }
                Err(e) => {
                    eprintln!("Merge failed: {}", e);
                    eprintln!("Some comments may already be updated; check with: asplay comments {}", event);
                    std::process::exit(1);
                }
            }
        }

        Commands::Seek { time } => {
            let seconds = parse_position(&time)?;
            match host_client().seek(seconds) {
                Ok(()) => println!("Seeking to {}", format_hh_mm_ss(seconds)),
                Err(e) => exit_host_error(e),
            }
        }

        Commands::ChapterSeek { event, song } => {
            let store = open_store()?;
            let chapters = event_chapters(&store, &event)?;
            let chapter = find_chapter(&chapters, &song)?;

            match host_client().seek(chapter.seek_target()) {
                Ok(()) => println!(
                    "Seeking to {} ({})",
                    chapter.name,
                    format_hh_mm_ss(chapter.seek_target())
                ),
                Err(e) => exit_host_error(e),
            }
        }

        Commands::Host { command } => match command {
            HostCommands::Start => {
                let client = host_client();
                if client.host_available() {
                    if client.ping().is_ok() {
                        println!("Host is already running");
                        return Ok(());
                    }
                    // Stale socket file - remove it
                    let _ = std::fs::remove_file(control_socket_path());
                }

                let host_path = std::env::current_exe()?
                    .parent()
                    .map(|p| p.join("asplayd"))
                    .context("Could not determine executable directory")?;

                if !host_path.exists() {
                    eprintln!("Host binary not found at {:?}", host_path);
                    std::process::exit(1);
                }

                let logs_dir = asplay_dir().join("logs");
                std::fs::create_dir_all(&logs_dir).context("Failed to create logs directory")?;

                use std::process::{Command, Stdio};
                let log_file = std::fs::File::create(logs_dir.join("asplayd.log"))
                    .context("Failed to create log file")?;
                let err_file = std::fs::File::create(logs_dir.join("asplayd.err"))
                    .context("Failed to create error log file")?;

                let child = Command::new(&host_path)
                    .stdout(Stdio::from(log_file))
                    .stderr(Stdio::from(err_file))
                    .spawn()
                    .context("Failed to start host")?;

                println!("Host started with PID {}", child.id());
                println!("Logs: {}", logs_dir.display());

                std::thread::sleep(Duration::from_millis(500));
                if client.ping().is_ok() {
                    println!("Host is running and responding");
                } else {
                    eprintln!("Warning: host started but not responding yet");
                    eprintln!("Check logs: {}", logs_dir.join("asplayd.err").display());
                }
            }

            HostCommands::Stop => match host_client().shutdown() {
                Ok(()) => println!("Host stopped"),
                Err(_) => println!("Host is not running"),
            },

            HostCommands::Status => {
                let client = host_client();
                match client.ping() {
                    Ok((uptime_secs, comments_received)) => {
                        println!("Host: Running");
                        println!("Uptime: {}s", uptime_secs);
                        println!("Comments received: {}", comments_received);
                    }
                    Err(_) => {
                        println!("Host: Not running");
                        return Ok(());
                    }
                }

                match client.status() {
                    Ok(status) => {
                        println!("Event: {}", status.event_name.as_deref().unwrap_or("-"));
                        match status.player_time_seconds {
                            Some(t) => println!("Player: {}", format_hh_mm_ss(t)),
                            None => println!("Player: -"),
                        }
                        println!("Seen comments: {}", status.seen_comments);
                        println!("Merged: {}", if status.merged { "yes" } else { "no" });
                        println!(
                            "Bridge: {}",
                            if status.bridge_connected { "connected" } else { "not connected" }
                        );
                        println!(
                            "Viewer: {}",
                            if status.viewer_connected { "connected" } else { "not connected" }
                        );
                        println!("Pending posts: {}", status.pending_posts);
                    }
                    Err(e) => eprintln!("Status unavailable: {}", e),
                }
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let path = config_path();
                let config = HostConfig::load(&path);
                println!("# {}", path.display());
                println!("{}", config.to_toml()?);
            }

            ConfigCommands::Init { force } => {
                let path = config_path();
                if path.exists() && !force {
                    eprintln!("{} already exists (use --force to overwrite)", path.display());
                    std::process::exit(1);
                }
                HostConfig::default().save(&path)?;
                println!("Wrote {}", path.display());
            }
        },
    }

    Ok(())
}
