use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use orgflow::codec::export_file_name;
use orgflow::collection::DocumentCollection;
use orgflow::core::{BlockId, Direction, Document, DocumentId, TextFormat};
use orgflow::editor::Edit;
use orgflow::navigate;
use orgflow::storage::{DEFAULT_STORE_FILE, DocumentRepository, JsonFileRepository, StoreConfig};
use orgflow::visibility::{has_children, is_visible};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "orgflow",
    about = "Outline editor for leveled Org/Markdown documents",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// JSON file holding the document collection.
    #[arg(long, global = true, env = "ORGFLOW_STORE", default_value = DEFAULT_STORE_FILE)]
    store: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List stored documents.
    List,

    /// Create a new document with a single empty block.
    New(NewArgs),

    /// Delete a document (the last one is kept).
    Delete(DocumentArgs),

    /// Rename a document.
    Rename(RenameArgs),

    /// Print the visible outline of a document.
    Show(ShowArgs),

    /// Collapse or expand a block's subtree.
    Toggle(BlockArgs),

    /// Move a block one level deeper.
    Indent(BlockArgs),

    /// Move a block one level shallower.
    Unindent(BlockArgs),

    /// Replace a block's text.
    Edit(EditArgs),

    /// Print the next visible block above or below another.
    Nav(NavArgs),

    /// Replace a document's blocks with the contents of an .org or .md file.
    Import(ImportArgs),

    /// Write a document as Org or Markdown text.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct NewArgs {
    /// Name for the new document.
    #[arg(long)]
    name: Option<String>,
}

#[derive(Debug, Args)]
struct DocumentArgs {
    /// Document id or exact name.
    document: String,
}

#[derive(Debug, Args)]
struct RenameArgs {
    /// Document id or exact name.
    document: String,
    name: String,
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// Document id or exact name. Defaults to the first document.
    document: Option<String>,
    /// Include blocks hidden under collapsed ancestors.
    #[arg(long)]
    all: bool,
    /// Prefix each line with the block index and id.
    #[arg(long)]
    ids: bool,
    /// Emit the document as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct BlockArgs {
    /// Document id or exact name.
    document: String,
    /// Block id or zero-based index.
    block: String,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[command(flatten)]
    target: BlockArgs,
    /// New block text (may be empty).
    content: String,
}

#[derive(Debug, Args)]
struct NavArgs {
    #[command(flatten)]
    target: BlockArgs,
    #[arg(value_enum)]
    direction: DirectionArg,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DirectionArg {
    Up,
    Down,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Up => Direction::Up,
            DirectionArg::Down => Direction::Down,
        }
    }
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// An .org or .md file.
    file: PathBuf,
    /// Document to replace. Without it a new document named after the file is created.
    #[arg(long)]
    into: Option<String>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Document id or exact name.
    document: String,
    #[arg(long, value_enum, default_value_t = FormatArg::Org)]
    format: FormatArg,
    /// Write to this path; `-` writes to stdout. Defaults to `<name>.<ext>`.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg {
    Org,
    Md,
}

impl From<FormatArg> for TextFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Org => TextFormat::Org,
            FormatArg::Md => TextFormat::Markdown,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let repo = JsonFileRepository::new(StoreConfig { path: cli.store });
    debug!(store = %repo.path().display(), "loading documents");
    let documents = repo
        .load()
        .with_context(|| format!("loading documents from {:?}", repo.path()))?;
    let mut collection = DocumentCollection::from_documents(documents);

    match cli.command {
        Commands::List => {
            handle_list(&collection);
            Ok(())
        }
        Commands::New(args) => handle_new(&repo, &mut collection, args),
        Commands::Delete(args) => handle_delete(&repo, &mut collection, args),
        Commands::Rename(args) => handle_rename(&repo, &mut collection, args),
        Commands::Show(args) => handle_show(&collection, args),
        Commands::Toggle(args) => {
            handle_edit(&repo, &mut collection, &args, Edit::ToggleCollapse)
        }
        Commands::Indent(args) => handle_edit(&repo, &mut collection, &args, Edit::Indent),
        Commands::Unindent(args) => handle_edit(&repo, &mut collection, &args, Edit::Unindent),
        Commands::Edit(EditArgs { target, content }) => {
            handle_edit(&repo, &mut collection, &target, move |id| {
                Edit::UpdateContent { id, content }
            })
        }
        Commands::Nav(args) => handle_nav(&collection, args),
        Commands::Import(args) => handle_import(&repo, &mut collection, args),
        Commands::Export(args) => handle_export(&collection, args),
    }
}

fn handle_list(collection: &DocumentCollection) {
    let current = collection.current().map(|doc| doc.id);
    for doc in collection.documents() {
        let marker = if Some(doc.id) == current { '*' } else { ' ' };
        println!(
            "{marker} {}  {:<24} {:>4} blocks  {}",
            doc.id,
            display_name(doc),
            doc.blocks.len(),
            doc.last_modified.format("%Y-%m-%d %H:%M")
        );
    }
}

fn handle_new(
    repo: &impl DocumentRepository,
    collection: &mut DocumentCollection,
    args: NewArgs,
) -> Result<()> {
    let id = collection.create();
    if let Some(name) = args.name {
        let renamed = lookup(collection, id)?.renamed(&name);
        collection.update(renamed)?;
    }
    repo.save(&collection.to_vec())?;
    println!("{id}");
    Ok(())
}

fn handle_delete(
    repo: &impl DocumentRepository,
    collection: &mut DocumentCollection,
    args: DocumentArgs,
) -> Result<()> {
    let id = resolve_document(collection, &args.document)?;
    let removed = collection.delete(id)?;
    repo.save(&collection.to_vec())?;
    println!("Deleted {:?}", display_name(&removed));
    Ok(())
}

fn handle_rename(
    repo: &impl DocumentRepository,
    collection: &mut DocumentCollection,
    args: RenameArgs,
) -> Result<()> {
    let id = resolve_document(collection, &args.document)?;
    let renamed = lookup(collection, id)?.renamed(&args.name);
    let name = renamed.name.clone();
    collection.update(renamed)?;
    repo.save(&collection.to_vec())?;
    println!("Renamed to {name:?}");
    Ok(())
}

fn handle_show(collection: &DocumentCollection, args: ShowArgs) -> Result<()> {
    let doc = match &args.document {
        Some(key) => lookup(collection, resolve_document(collection, key)?)?,
        None => collection
            .current()
            .context("the collection has no documents")?,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(doc)?);
        return Ok(());
    }
    print!(
        "{}",
        render_outline(
            doc,
            RenderOptions {
                all: args.all,
                ids: args.ids
            }
        )
    );
    Ok(())
}

fn handle_edit(
    repo: &impl DocumentRepository,
    collection: &mut DocumentCollection,
    target: &BlockArgs,
    make_edit: impl FnOnce(BlockId) -> Edit,
) -> Result<()> {
    let doc_id = resolve_document(collection, &target.document)?;
    let doc = lookup(collection, doc_id)?;
    let block_id = resolve_block(doc, &target.block)?;
    let edit = make_edit(block_id);

    let next = doc.apply(&edit);
    if next == *doc {
        println!("No change");
        return Ok(());
    }
    info!(document = %doc_id, ?edit, "applied edit");
    collection.update(next)?;
    repo.save(&collection.to_vec())?;
    print!("{}", render_outline(lookup(collection, doc_id)?, RenderOptions::default()));
    Ok(())
}

fn handle_nav(collection: &DocumentCollection, args: NavArgs) -> Result<()> {
    let NavArgs { target, direction } = args;
    let doc = lookup(collection, resolve_document(collection, &target.document)?)?;
    let from = resolve_block(doc, &target.block)?;
    let direction = Direction::from(direction);

    match navigate(&doc.blocks, from, direction) {
        Some(id) => {
            let index = doc
                .blocks
                .iter()
                .position(|b| b.id == id)
                .context("navigation returned a block outside the document")?;
            let block = &doc.blocks[index];
            println!("{index} {id} {}", block_text(&block.content));
        }
        None => eprintln!("No visible block {direction} from here."),
    }
    Ok(())
}

fn handle_import(
    repo: &impl DocumentRepository,
    collection: &mut DocumentCollection,
    args: ImportArgs,
) -> Result<()> {
    let ImportArgs { file, into } = args;
    let format = TextFormat::from_path(&file)?;
    let text = fs::read_to_string(&file).with_context(|| format!("reading {:?}", file))?;

    let base = match into {
        Some(key) => lookup(collection, resolve_document(collection, &key)?)?.clone(),
        None => {
            let id = collection.create();
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            lookup(collection, id)?.renamed(&stem)
        }
    };

    let imported = base.import(&text, format);
    let (id, count) = (imported.id, imported.blocks.len());
    collection.update(imported)?;
    repo.save(&collection.to_vec())?;
    println!("Imported {count} blocks from {:?} into {id}", file);
    Ok(())
}

fn handle_export(collection: &DocumentCollection, args: ExportArgs) -> Result<()> {
    let doc = lookup(collection, resolve_document(collection, &args.document)?)?;
    let format = TextFormat::from(args.format);
    let text = doc.export(format);

    match args.output {
        Some(path) if path.as_os_str() == "-" => println!("{text}"),
        output => {
            let path = output.unwrap_or_else(|| PathBuf::from(export_file_name(doc, format)));
            fs::write(&path, text.as_bytes()).with_context(|| format!("writing {:?}", path))?;
            println!("Wrote {} blocks to {:?}", doc.blocks.len(), path);
        }
    }
    Ok(())
}

/* ------------------------------- Rendering ------------------------------- */

#[derive(Debug, Clone, Copy, Default)]
struct RenderOptions {
    all: bool,
    ids: bool,
}

/// Indented outline, two spaces per level. Blocks with children get a `▾`
/// (expanded) or `▸` (collapsed) marker.
fn render_outline(doc: &Document, opts: RenderOptions) -> String {
    let mut out = String::new();
    for (index, block) in doc.blocks.iter().enumerate() {
        let visible = is_visible(&doc.blocks, index);
        if !visible && !opts.all {
            continue;
        }
        if opts.ids {
            out.push_str(&format!("{index:>3} {} ", block.id));
        }
        let indent = "  ".repeat(block.level.saturating_sub(1) as usize);
        let marker = match (has_children(&doc.blocks, index), block.collapsed) {
            (true, true) => '▸',
            (true, false) => '▾',
            (false, _) => ' ',
        };
        let hidden = if visible { "" } else { "  (hidden)" };
        out.push_str(&format!(
            "{indent}{marker} {}{hidden}\n",
            block_text(&block.content)
        ));
    }
    out
}

fn block_text(content: &str) -> &str {
    if content.is_empty() {
        "Empty block..."
    } else {
        content
    }
}

fn display_name(doc: &Document) -> &str {
    if doc.name.is_empty() {
        "Untitled"
    } else {
        &doc.name
    }
}

/* ------------------------------- Lookups ------------------------------- */

fn resolve_document(collection: &DocumentCollection, key: &str) -> Result<DocumentId> {
    collection
        .resolve(key)
        .with_context(|| format!("no document matches {key:?}"))
}

fn lookup(collection: &DocumentCollection, id: DocumentId) -> Result<&Document> {
    collection
        .get(id)
        .with_context(|| format!("no document with id {id}"))
}

/// Accepts a block id or a zero-based index into the document.
fn resolve_block(doc: &Document, key: &str) -> Result<BlockId> {
    if let Ok(index) = key.parse::<usize>() {
        return doc.blocks.get(index).map(|b| b.id).with_context(|| {
            format!(
                "block index {index} is out of range ({} blocks)",
                doc.blocks.len()
            )
        });
    }
    let id: BlockId = key
        .parse()
        .with_context(|| format!("{key:?} is neither a block index nor a block id"))?;
    doc.block(id)
        .map(|b| b.id)
        .with_context(|| format!("no block with id {id} in {:?}", doc.name))
}
