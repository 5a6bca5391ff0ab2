//! Main entry point for the runzim CLI application.
//!
//! This binary inspects ZIM archives stored on the local filesystem, split
//! into parts, or served over HTTP.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use runzim::{
    Archive, ArchiveLoader, ArchiveOptions, Cli, HttpRangeReader, HttpStorage, LocalStorage,
    ReadAt, Search, SearchMode,
};

/// Metadata keys shown by `-i`
const METADATA_KEYS: &[&str] = &[
    "Title",
    "Description",
    "Language",
    "Creator",
    "Publisher",
    "Date",
    "Name",
    "Flavour",
    "Scraper",
];

/// Application entry point.
///
/// Parses command-line arguments, sets up logging, opens the archive and
/// dispatches to the requested mode.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut options = ArchiveOptions::default();
    if cli.full {
        options.search_mode = SearchMode::Full;
    }

    if cli.is_http_url() && !runzim::zim::is_split_name(&cli.file) {
        // Single remote file: keep the reader to report transfer statistics
        let reader = Arc::new(HttpRangeReader::new(cli.file.clone()).await?);
        let transferred_before = reader.transferred_bytes();
        let requests_before = reader.request_count();
        let part: Arc<dyn ReadAt> = reader.clone();
        let archive = Archive::open(vec![part], options).await?;

        process_archive(&archive, &cli).await?;

        let transferred = reader.transferred_bytes() - transferred_before;
        eprintln!(
            "\nTotal bytes transferred: {} in {} requests",
            format_size(transferred),
            reader.request_count() - requests_before
        );
    } else {
        let loader = if cli.is_http_url() {
            ArchiveLoader::new(Arc::new(HttpStorage::new("")?), options)
        } else {
            ArchiveLoader::new(Arc::new(LocalStorage::new("")), options)
        };
        let archive = loader
            .load(&cli.file)
            .await
            .with_context(|| format!("failed to open {}", cli.file))?;
        process_archive(&archive, &cli).await?;
    }

    Ok(())
}

/// Run every mode selected on the command line; show info when none is.
async fn process_archive(archive: &Archive, cli: &Cli) -> Result<()> {
    let nothing_selected =
        !cli.list && !cli.main_page && !cli.random && cli.print.is_none() && cli.search.is_none();

    if cli.info || nothing_selected {
        show_info(archive).await?;
    }
    if cli.list {
        list_entries(archive).await?;
    }
    if cli.main_page {
        match archive.get_main_page_dir_entry().await? {
            Some(entry) => println!("{}", entry.path()),
            None => bail!("archive has no main page"),
        }
    }
    if cli.random {
        match archive.get_random_dir_entry().await? {
            Some(entry) => println!("{}\t{}", entry.path(), entry.title_or_url()),
            None => bail!("archive has no articles"),
        }
    }
    if let Some(query) = &cli.search {
        search(archive, query, cli).await?;
    }
    if let Some(path) = &cli.print {
        print_content(archive, path).await?;
    }
    Ok(())
}

async fn show_info(archive: &Archive) -> Result<()> {
    let header = archive.file().header();
    println!("UUID:              {}", archive.uuid());
    println!(
        "Version:           {}.{}",
        header.major_version, header.minor_version
    );
    println!("Parts:             {}", archive.file().part_count());
    if archive.is_split() {
        let sizes = archive.file().reader().part_sizes();
        for (n, size) in sizes.iter().enumerate() {
            println!("  part {:<3}         {}", n, format_size(*size));
        }
    }
    println!("Entries:           {}", archive.entry_count());
    println!("Clusters:          {}", header.cluster_count);
    match archive.article_count() {
        Some(count) => println!("Articles:          {}", count),
        None => println!("Articles:          (no listing)"),
    }
    println!("Content namespace: {}", archive.content_namespace());
    println!("Type:              {:?}", archive.zim_type());
    println!(
        "Full-text index:   {}",
        if archive.file().fulltext_index().is_some() {
            "yes"
        } else {
            "no"
        }
    );

    for key in METADATA_KEYS {
        if let Some(value) = archive.metadata(key).await? {
            println!("{:<18} {}", format!("{key}:"), value);
        }
    }
    Ok(())
}

/// List every entry in URL order.
async fn list_entries(archive: &Archive) -> Result<()> {
    let mut redirects = 0usize;
    for index in 0..archive.entry_count() {
        let Some(entry) = archive.get_dir_entry_by_url_index(index).await? else {
            continue;
        };
        if entry.is_redirect() {
            redirects += 1;
        }
        println!(
            "{:<40}  {:<24}  {}",
            entry.path(),
            entry.mimetype().unwrap_or("redirect"),
            entry.title_or_url()
        );
    }
    println!("{}", "-".repeat(70));
    println!(
        "{} entries, {} redirects",
        archive.entry_count(),
        redirects
    );
    Ok(())
}

async fn search(archive: &Archive, query: &str, cli: &Cli) -> Result<()> {
    let search = Search::new(query, cli.limit).with_mode(archive.options().search_mode);
    let results = archive.find_dir_entries_with_prefix(&search).await?;
    for entry in &results.entries {
        println!("{}\t{}", entry.path(), entry.title_or_url());
    }
    if results.fulltext_used {
        eprintln!("(results include full-text matches)");
    }
    Ok(())
}

/// Write an entry's content to stdout.
async fn print_content(archive: &Archive, path: &str) -> Result<()> {
    let Some(content) = archive.read_content_by_path(path).await? else {
        bail!("no content at {}", path);
    };
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&content.data).await?;
    stdout.flush().await?;
    Ok(())
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
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
        format!("{} bytes", size)
    }
}
