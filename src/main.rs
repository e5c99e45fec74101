//! Main entry point for the warcex CLI application.
//!
//! Reads a WACZ archive from the local filesystem or an HTTP URL and runs
//! the registered handlers over the request/response pairs it contains.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use warcex::cli::{Cli, Command, HandlerLookup, PluginArgs, is_http_url, lookup_handler};
use warcex::{
    ExtractionResult, HandlerDescriptor, HandlerRegistry, ProcessorOptions, ReadAt, WaczProcessor,
};

const MAX_SUGGESTIONS: usize = 5;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    match cli.command {
        Command::Extract {
            archive,
            output,
            plugins,
            only,
        } => {
            let options = ProcessorOptions {
                output_root: output,
                extra_handlers: plugins.paths,
                only,
            };
            extract(&archive, options).await
        }
        Command::Plugins { plugins } => list_plugins(&plugins),
        Command::Info { handler, plugins } => plugin_info(&handler, &plugins),
    }
}

/// `RUST_LOG` wins over the command-line verbosity.
fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn extract(archive: &str, options: ProcessorOptions) -> Result<()> {
    let output_root = options.output_root.clone();

    if is_http_url(archive) {
        let mut processor = WaczProcessor::open_url(archive, options)
            .await
            .with_context(|| format!("failed to open {archive}"))?;
        let result = run(&mut processor, archive).await?;
        let transferred = processor.archive().reader().transferred_bytes();
        print_summary(&result, &output_root);
        println!("Total bytes transferred: {}", format_size(transferred));
    } else {
        let mut processor = WaczProcessor::open(Path::new(archive), options)
            .await
            .with_context(|| format!("failed to open {archive}"))?;
        let result = run(&mut processor, archive).await?;
        print_summary(&result, &output_root);
    }
    Ok(())
}

async fn run<R: ReadAt>(processor: &mut WaczProcessor<R>, archive: &str) -> Result<ExtractionResult> {
    if let Ok(Some(metadata)) = processor.archive().metadata().await
        && let Some(title) = metadata.get("title").and_then(|t| t.as_str())
    {
        println!("Extracting content from: {title}");
    }

    let result = processor
        .run()
        .await
        .with_context(|| format!("extraction from {archive} failed"))?;
    processor.close().context("failed to release scratch storage")?;
    Ok(result)
}

fn print_summary(result: &ExtractionResult, output_root: &Path) {
    println!("Extracted {} items from archive", result.total_processed);
    for (handler, count) in &result.handler_counts {
        println!("  - {handler}: {count} items");
    }
    if !result.failures.is_empty() {
        println!("{} handler call(s) failed:", result.failures.len());
        for failure in &result.failures {
            match &failure.url {
                Some(url) => println!("  - {} ({}) {}: {}", failure.handler, failure.stage, url, failure.message),
                None => println!("  - {} ({}): {}", failure.handler, failure.stage, failure.message),
            }
        }
    }
    if result.total_processed > 0 {
        println!("Results written to {}", output_root.display());
    }
}

/// Registry for the listing commands. Nothing is written, so the output
/// root is only nominal.
fn load_registry(plugins: &PluginArgs) -> Result<HandlerRegistry> {
    let output_root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut registry = HandlerRegistry::with_builtins(output_root);
    for path in &plugins.paths {
        registry
            .sideload(path)
            .with_context(|| format!("failed to load handler {}", path.display()))?;
    }
    Ok(registry)
}

fn list_plugins(plugins: &PluginArgs) -> Result<()> {
    let registry = load_registry(plugins)?;
    println!("Available plugins:");
    for (i, descriptor) in registry.descriptors().enumerate() {
        println!(
            "{}. {} (v{}): {}",
            i + 1,
            descriptor.name,
            descriptor.version,
            descriptor.description
        );
    }
    Ok(())
}

fn plugin_info(query: &str, plugins: &PluginArgs) -> Result<()> {
    let registry = load_registry(plugins)?;
    let handlers: Vec<HandlerDescriptor> = registry.descriptors().cloned().collect();
    if handlers.is_empty() {
        println!("No plugins are currently installed.");
        return Ok(());
    }

    match lookup_handler(&handlers, query) {
        HandlerLookup::Found(descriptor) => print_descriptor(descriptor),
        HandlerLookup::Similar(descriptor) => {
            println!("Found plugin with similar name: {}", descriptor.name);
            print_descriptor(descriptor);
        }
        HandlerLookup::OutOfRange { count } => {
            println!("Invalid plugin number. Please enter a number between 1 and {count}.");
        }
        HandlerLookup::NotFound => {
            println!("Plugin '{query}' not found. Available plugins include:");
            let suggestions: Vec<String> = handlers
                .iter()
                .take(MAX_SUGGESTIONS)
                .enumerate()
                .map(|(i, d)| format!("{}: {}", i + 1, d.name))
                .collect();
            let more = handlers.len().saturating_sub(MAX_SUGGESTIONS);
            if more > 0 {
                println!("{} and {more} more...", suggestions.join(", "));
            } else {
                println!("{}", suggestions.join(", "));
            }
        }
    }
    Ok(())
}

fn print_descriptor(descriptor: &HandlerDescriptor) {
    println!("{} (v{}): {}", descriptor.name, descriptor.version, descriptor.description);
    println!(
        "Instructions: {}",
        descriptor.instructions.as_deref().unwrap_or("none")
    );
    println!("Outputs: {}", descriptor.output_data.join(", "));
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{size} bytes")
    }
}
