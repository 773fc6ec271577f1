//! lector - inspect EPUB books

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use lector::{Book, BookOptions, ChapterContents, ChapterRef, RenderSettings, ValidationMode};

#[derive(Parser)]
#[command(name = "lector")]
#[command(version, about = "Inspect EPUB books", long_about = None)]
#[command(after_help = "EXAMPLES:
    lector entries book.epub          List archive entries
    lector toc book.epub --pretty     Show the table of contents
    lector render book.epub 3         Print the rewritten fourth chapter")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    /// Fail on structural problems instead of skipping them
    #[arg(long, global = true)]
    strict: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List archive entries
    Entries {
        /// EPUB file
        epub: PathBuf,
    },
    /// Show package metadata
    Metadata {
        /// EPUB file
        epub: PathBuf,
    },
    /// List spine chapters
    Chapters {
        /// EPUB file
        epub: PathBuf,
    },
    /// Show the table of contents
    Toc {
        /// EPUB file
        epub: PathBuf,
    },
    /// Print the rewritten document of one chapter
    Render {
        /// EPUB file
        epub: PathBuf,
        /// Spine index or archive path
        chapter: String,
        /// Font size override (CSS value)
        #[arg(long)]
        font_size: Option<String>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn open(epub: PathBuf, strict: bool) -> lector::Result<Book> {
    let mut options = BookOptions::default();
    if strict {
        options = options.with_validation_mode(ValidationMode::Strict);
    }
    let book = Book::epub(epub, options);
    book.init().await?;
    Ok(book)
}

fn print(value: &Value, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("error: {e}"),
    }
}

async fn run(cli: Cli) -> lector::Result<()> {
    let pretty = cli.pretty;
    match cli.command {
        Command::Entries { epub } => {
            let book = open(epub, cli.strict).await?;
            let entries: Vec<Value> = book
                .archive()
                .entries()?
                .iter()
                .map(|entry| {
                    json!({
                        "path": entry.path(),
                        "size": entry.uncompressed_size(),
                        "compressed": entry.compressed_size(),
                        "dir": entry.is_dir(),
                        "mediaType": entry.media_type(),
                    })
                })
                .collect();
            print(&Value::Array(entries), pretty);
        }
        Command::Metadata { epub } => {
            let book = open(epub, cli.strict).await?;
            print(&serde_json::to_value(book.metadata()?)?, pretty);
        }
        Command::Chapters { epub } => {
            let book = open(epub, cli.strict).await?;
            let chapters: Vec<Value> = book
                .chapters()?
                .iter()
                .map(|chapter| {
                    json!({
                        "index": chapter.index(),
                        "id": chapter.id(),
                        "path": chapter.path(),
                        "mediaType": chapter.media_type(),
                        "linear": chapter.is_linear(),
                    })
                })
                .collect();
            print(&Value::Array(chapters), pretty);
        }
        Command::Toc { epub } => {
            let book = open(epub, cli.strict).await?;
            let toc = serde_json::to_value(book.toc()?)?;
            print(&toc, pretty);
        }
        Command::Render {
            epub,
            chapter,
            font_size,
        } => {
            let book = open(epub, cli.strict).await?;
            let chapter_ref = match chapter.parse::<usize>() {
                Ok(index) => ChapterRef::Index(index),
                Err(_) => ChapterRef::Href(chapter),
            };
            let mut settings = RenderSettings::default();
            if let Some(size) = font_size {
                settings = settings.with_font_size(size);
            }
            let contents = ChapterContents::new(book.clone(), book.chapter(&chapter_ref)?, settings);
            let url = contents.load(false).await?;
            if let Some(blob) = book.blobs().get(&url) {
                println!("{}", String::from_utf8_lossy(&blob.data));
            }
            contents.unload().await?;
        }
    }
    Ok(())
}
