use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use folio_core::config::{config_path, load_config, reader_options_from_config, AppConfig};
use folio_core::detect::{self, ArchiveKind};
use folio_core::reader::{BookInfo, BookReader};
use folio_core::readers::epub::TocNode;
use folio_core::readers::pdf::PdfOutlineNode;

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Inspect and extract pages from comic archives, EPUB packages and PDFs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the page numbers of a book
    Pages {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// Show structure and metadata
    Info {
        /// Input file
        #[arg(required = true)]
        input: String,
    },

    /// Copy one page, archive entry or cover out of a book
    Extract {
        /// Input file
        #[arg(required = true)]
        input: String,

        /// 1-based page number (default 1)
        #[arg(short, long, conflicts_with_all = ["entry", "cover"])]
        page: Option<usize>,

        /// Entry name (comic image or EPUB package file)
        #[arg(short, long, conflicts_with = "cover")]
        entry: Option<String>,

        /// Extract the EPUB cover image
        #[arg(long)]
        cover: bool,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize default config file
    Init,
    /// Show current configuration
    Show,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Pages { input } => run_pages(input, cli.json),
        Commands::Info { input } => run_info(input, cli.json),
        Commands::Extract {
            input,
            page,
            entry,
            cover,
            output,
        } => run_extract(input, *page, entry.as_deref(), *cover, output.as_deref(), cli.json),
        Commands::Config { action } => run_config(action, cli.json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn book_reader() -> BookReader {
    BookReader::new(&reader_options_from_config(&load_config()))
}

fn run_pages(input: &str, json: bool) -> CliResult {
    let path = Path::new(input);
    let reader = book_reader();
    let pages = reader.available_pages(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pages)?);
        return Ok(());
    }

    // Comics get their image names alongside the numbers.
    if let BookInfo::Cbx(info) = reader.book_info(path)? {
        for page in &info.page_info {
            println!("{:>5}  {}", page.page_number, page.display_name);
        }
    } else {
        for page in &pages {
            println!("{}", page);
        }
    }
    Ok(())
}

fn run_info(input: &str, json: bool) -> CliResult {
    let path = Path::new(input);
    let kind = ArchiveKind::from_path(path)?;
    let info = book_reader().book_info(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Format: {}", kind);
    if let Ok(Some(actual)) = detect::sniff_file(path) {
        if actual != kind.container() {
            println!("Warning: content looks like {:?}", actual);
        }
    }
    println!("Pages: {}", info.page_count());

    match &info {
        BookInfo::Cbx(cbx) => {
            if let (Some(first), Some(last)) = (cbx.page_info.first(), cbx.page_info.last()) {
                println!("First page: {}", first.display_name);
                println!("Last page: {}", last.display_name);
            }
        }
        BookInfo::Epub(epub) => {
            for (key, value) in &epub.metadata {
                println!("{}: {}", capitalize(key), value);
            }
            println!("Package: {}", epub.container_path);
            println!("Manifest items: {}", epub.manifest.len());
            if let Some(cover) = &epub.cover_path {
                println!("Cover: {}", cover);
            }
            if let Some(toc) = &epub.toc {
                println!("Contents ({}):", toc.label);
                print_toc(&toc.children, 1);
            }
        }
        BookInfo::Pdf(pdf) => {
            for (key, value) in &pdf.metadata {
                println!("{}: {}", capitalize(key), value);
            }
            if !pdf.outline.is_empty() {
                println!("Outline:");
                print_outline(&pdf.outline, 1);
            }
        }
    }
    Ok(())
}

fn print_toc(nodes: &[TocNode], depth: usize) {
    for node in nodes {
        match &node.href {
            Some(href) => println!("{}{} -> {}", "  ".repeat(depth), node.label, href),
            None => println!("{}{}", "  ".repeat(depth), node.label),
        }
        print_toc(&node.children, depth + 1);
    }
}

fn print_outline(nodes: &[PdfOutlineNode], depth: usize) {
    for node in nodes {
        match node.page_number {
            Some(page) => println!("{}{} (p. {})", "  ".repeat(depth), node.title, page),
            None => println!("{}{}", "  ".repeat(depth), node.title),
        }
        print_outline(&node.children, depth + 1);
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn run_extract(
    input: &str,
    page: Option<usize>,
    entry: Option<&str>,
    cover: bool,
    output: Option<&str>,
    json: bool,
) -> CliResult {
    let path = Path::new(input);
    let reader = book_reader();
    let kind = ArchiveKind::from_path(path)?;

    if cover && kind != ArchiveKind::Epub {
        return Err(format!("{} has no cover image; use --page 1", kind).into());
    }

    let mut sink: Box<dyn Write> = match output {
        Some(out) => Box::new(BufWriter::new(File::create(out)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let written = if cover {
        reader.epub().stream_cover(path, &mut sink)?
    } else if let Some(entry) = entry {
        reader.stream_entry(path, entry, &mut sink)?
    } else {
        reader.stream_page(path, page.unwrap_or(1), &mut sink)?
    };
    sink.flush()?;

    if let Some(out) = output {
        if json {
            let summary = serde_json::json!({ "output": out, "bytes": written });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            println!("Extracted {} bytes to {}", written, out);
        }
    }
    Ok(())
}

fn run_config(action: &ConfigAction, json: bool) -> CliResult {
    match action {
        ConfigAction::Init => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml = toml::to_string_pretty(&AppConfig::default())?;
            std::fs::write(&path, toml)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let cfg = load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
    }
    Ok(())
}
