use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::handler::HandlerDescriptor;

#[derive(Parser, Debug)]
#[command(name = "warcex")]
#[command(version)]
#[command(about = "Extract structured data from WACZ web archives with URL-routed handlers", long_about = None)]
#[command(after_help = "Examples:\n  \
  warcex extract capture.wacz -o out               run every handler over capture.wacz\n  \
  warcex extract capture.wacz --only fb-groups     run a single handler\n  \
  warcex extract https://example.com/c.wacz        read a remote archive with Range requests\n  \
  warcex plugins -p ./libreddit_feed.so            list handlers, including a sideloaded one")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// More log output (debug level)
    #[arg(short = 'v', long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only warnings and errors
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract data from an archive
    Extract {
        /// WACZ file path or HTTP URL
        #[arg(value_name = "ARCHIVE")]
        archive: String,

        /// Output directory for handler results
        #[arg(short = 'o', long, value_name = "DIR", default_value = "output")]
        output: PathBuf,

        #[command(flatten)]
        plugins: PluginArgs,

        /// Route pairs to this handler only
        #[arg(long, value_name = "NAME")]
        only: Option<String>,
    },

    /// List available handlers
    Plugins {
        #[command(flatten)]
        plugins: PluginArgs,
    },

    /// Show details of one handler
    Info {
        /// Handler name, part of a name, or number from `warcex plugins`
        #[arg(value_name = "NAME|NUMBER")]
        handler: String,

        #[command(flatten)]
        plugins: PluginArgs,
    },
}

#[derive(Args, Debug, Default)]
pub struct PluginArgs {
    /// Handler library to sideload (repeatable)
    #[arg(short = 'p', long = "plugin", value_name = "PLUGIN")]
    pub paths: Vec<PathBuf>,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

pub fn is_http_url(archive: &str) -> bool {
    archive.starts_with("http://") || archive.starts_with("https://")
}

/// Result of looking a handler up by what the user typed.
#[derive(Debug, PartialEq, Eq)]
pub enum HandlerLookup<'a> {
    /// Matched by 1-based number or by name, ignoring case.
    Found(&'a HandlerDescriptor),
    /// No exact name; the first name containing the query.
    Similar(&'a HandlerDescriptor),
    /// A number outside `1..=count`.
    OutOfRange { count: usize },
    NotFound,
}

pub fn lookup_handler<'a>(handlers: &'a [HandlerDescriptor], query: &str) -> HandlerLookup<'a> {
    if let Ok(number) = query.trim().parse::<usize>() {
        return match number.checked_sub(1).and_then(|i| handlers.get(i)) {
            Some(descriptor) => HandlerLookup::Found(descriptor),
            None => HandlerLookup::OutOfRange {
                count: handlers.len(),
            },
        };
    }

    let query = query.to_lowercase();
    if let Some(descriptor) = handlers.iter().find(|d| d.name.to_lowercase() == query) {
        return HandlerLookup::Found(descriptor);
    }
    match handlers.iter().find(|d| d.name.to_lowercase().contains(&query)) {
        Some(descriptor) => HandlerLookup::Similar(descriptor),
        None => HandlerLookup::NotFound,
    }
}
