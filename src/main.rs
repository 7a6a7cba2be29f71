use std::error::Error;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use bookshelf::{
    BookField, BookId, CatalogQuery, Delta, EditSession, FieldValue, Library, RecordStore,
};

/// A personal book catalog: list, add, edit and delete books, with all
/// changes flowing through edit sessions and reported as the view
/// deltas a rendered list would apply.
#[derive(Parser)]
#[command(name = "bookshelf", version, about)]
struct Cli {
    /// Catalog database path (defaults to the user data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the catalog grouped by author
    List {
        /// Emit the grouped catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one book
    Show { id: String },
    /// Add a new book through an edit session
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        /// Copyright date, YYYY-MM-DD
        #[arg(long)]
        copyright: String,
    },
    /// Edit fields of an existing book
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Copyright date, YYYY-MM-DD
        #[arg(long)]
        copyright: Option<String>,
    },
    /// Delete a book
    Remove { id: String },
    /// Pre-populate an empty catalog with a few classics
    Seed,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut library = match &cli.db {
        Some(path) => Library::open(path)?,
        None => Library::new()?,
    };

    match cli.command {
        Command::List { json } => list(&library, json)?,
        Command::Show { id } => show(&library, &id)?,
        Command::Add {
            title,
            author,
            copyright,
        } => add(&mut library, title, author, &copyright)?,
        Command::Edit {
            id,
            title,
            author,
            copyright,
        } => edit(&mut library, &id, title, author, copyright.as_deref())?,
        Command::Remove { id } => remove(&mut library, &id)?,
        Command::Seed => {
            let seeded = library.seed_if_empty()?;
            if seeded > 0 {
                println!("📚 Seeded {} classics.", seeded);
            } else {
                println!("Catalog already has books; nothing seeded.");
            }
        }
    }
    Ok(())
}

fn parse_id(s: &str) -> Result<BookId, Box<dyn Error>> {
    BookId::parse(s).ok_or_else(|| format!("'{}' is not a book id", s).into())
}

fn parse_date(s: &str) -> Result<NaiveDate, Box<dyn Error>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("bad date '{}' (expected YYYY-MM-DD): {}", s, e).into())
}

fn list(library: &Library, json: bool) -> Result<(), Box<dyn Error>> {
    let mut catalog = CatalogQuery::new("title", "author")?;
    catalog.refetch(library)?;

    if json {
        let mut out = Vec::new();
        for (author, ids) in catalog.snapshot() {
            let mut books = Vec::new();
            for id in ids {
                if let Some(book) = library.read(id)? {
                    books.push(book);
                }
            }
            out.push(serde_json::json!({ "author": author, "books": books }));
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let snapshot = catalog.snapshot();
    if snapshot.is_empty() {
        println!("The catalog is empty. Try `bookshelf seed` or `bookshelf add`.");
        return Ok(());
    }
    for (author, ids) in snapshot {
        let heading = if author.is_empty() {
            "(no author)"
        } else {
            author.as_str()
        };
        println!("{}", heading);
        for id in ids {
            if let Some(book) = library.read(id)? {
                let title = book.title.as_deref().unwrap_or("(untitled)");
                let year = book
                    .copyright
                    .map(|d| d.format("%Y").to_string())
                    .unwrap_or_else(|| "----".to_string());
                println!("  {}  {}  [{}]", year, title, book.id);
            }
        }
    }
    Ok(())
}

fn show(library: &Library, id: &str) -> Result<(), Box<dyn Error>> {
    let id = parse_id(id)?;
    match library.read(id)? {
        Some(book) => {
            println!("title:     {}", book.title.as_deref().unwrap_or("-"));
            println!("author:    {}", book.author.as_deref().unwrap_or("-"));
            println!(
                "copyright: {}",
                book.copyright
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!("id:        {}", book.id);
        }
        None => println!("No book with id {}.", id),
    }
    Ok(())
}

/// Run one session against the library and print the deltas a rendered
/// list would apply, the way the app's table view animates changes.
fn with_live_catalog<F>(library: &mut Library, mutate: F) -> Result<(), Box<dyn Error>>
where
    F: FnOnce(&mut Library) -> Result<(), Box<dyn Error>>,
{
    let mut catalog = CatalogQuery::new("title", "author")?;
    catalog.refetch(&*library)?;
    let events = library.subscribe();

    mutate(library)?;

    let mut deltas: Vec<Delta> = Vec::new();
    while let Ok(event) = events.try_recv() {
        deltas.extend(catalog.apply_event(&*library, &event)?);
    }
    for delta in &deltas {
        println!("  view: {}", serde_json::to_string(delta)?);
    }
    Ok(())
}

fn add(
    library: &mut Library,
    title: String,
    author: String,
    copyright: &str,
) -> Result<(), Box<dyn Error>> {
    let copyright = parse_date(copyright)?;

    with_live_catalog(library, |library| {
        let mut session = EditSession::begin(library)?;
        session.on_finished(|saved| {
            if saved {
                println!("✅ Book saved.");
            }
        });

        let id = session.create()?;
        session.set_field(id, BookField::Title, FieldValue::text(title))?;
        session.set_field(id, BookField::Author, FieldValue::text(author))?;
        session.set_field(id, BookField::Copyright, FieldValue::date(copyright))?;
        session.commit()?;
        println!("   id: {}", id);
        Ok(())
    })
}

fn edit(
    library: &mut Library,
    id: &str,
    title: Option<String>,
    author: Option<String>,
    copyright: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let id = parse_id(id)?;
    let copyright = copyright.map(parse_date).transpose()?;
    if title.is_none() && author.is_none() && copyright.is_none() {
        return Err("nothing to change; pass --title, --author or --copyright".into());
    }

    with_live_catalog(library, |library| {
        let mut session = EditSession::begin(library)?;
        session.on_finished(|saved| {
            if saved {
                println!("✅ Changes saved.");
            }
        });

        session.edit(id)?;
        if let Some(title) = title {
            session.set_field(id, BookField::Title, FieldValue::text(title))?;
        }
        if let Some(author) = author {
            session.set_field(id, BookField::Author, FieldValue::text(author))?;
        }
        if let Some(copyright) = copyright {
            session.set_field(id, BookField::Copyright, FieldValue::date(copyright))?;
        }
        session.commit()?;
        Ok(())
    })
}

fn remove(library: &mut Library, id: &str) -> Result<(), Box<dyn Error>> {
    let id = parse_id(id)?;

    with_live_catalog(library, |library| {
        let mut session = EditSession::begin(library)?;
        session.delete(id)?;
        session.commit()?;
        println!("🗑  Book removed.");
        Ok(())
    })
}
