use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use asset_browser::interface::{FrontEnd, LogNotifier, StatusLevel};
use asset_browser::paths::AssetDirs;
use asset_browser::sync::preview::preview_pairs;
use asset_browser::{
    Asset, AssetInput, AssetKey, AssetLibrary, AssetRecord, LibrarySettings, SyncEvent,
};

/// Line-based frontend for driving the library from a terminal
struct ConsoleFront {
    stdin: io::Stdin,
}

impl ConsoleFront {
    fn new() -> Self {
        ConsoleFront { stdin: io::stdin() }
    }

    /// Read one trimmed line; `None` once input is closed
    fn prompt(&mut self, label: &str) -> Option<String> {
        print!("{label}");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match self.stdin.lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(e) => {
                warn!(error = %e, "could not read input");
                None
            }
        }
    }

    fn prompt_paths(&mut self, label: &str) -> Option<Vec<PathBuf>> {
        let line = self.prompt(label)?;
        Some(line.split_whitespace().map(PathBuf::from).collect())
    }
}

impl FrontEnd for ConsoleFront {
    fn display_assets(&mut self, assets: &[AssetRecord]) {
        if assets.is_empty() {
            println!("no matches");
            return;
        }
        for asset in assets {
            let icon = if asset.icon.is_some() { "*" } else { " " };
            println!(
                "{:>4} {} {:<20} {}",
                asset.id,
                icon,
                asset.name,
                asset.path.display()
            );
        }
    }

    fn form_input(&mut self) -> Option<AssetInput> {
        let name = self.prompt("name: ")?;
        let tags = self.prompt("tags (space separated): ")?;
        let description = self.prompt("description: ")?;
        let parent = self.prompt("parent folder (empty for library root): ")?;
        let scenes = self.prompt_paths("content files: ")?;
        let gallery = self.prompt_paths("gallery images: ")?;
        let icon = self.prompt("icon image (empty for none): ")?;
        let rename = self.prompt("rename content files after the asset? [y/N]: ")?;

        Some(AssetInput {
            name,
            parent: PathBuf::from(parent),
            tags: tags.split_whitespace().map(str::to_string).collect(),
            description,
            scenes,
            gallery,
            icon: (!icon.is_empty()).then(|| PathBuf::from(icon)),
            rename_content: rename.eq_ignore_ascii_case("y"),
            ..AssetInput::default()
        })
    }

    fn show_status(&mut self, message: &str, level: StatusLevel) {
        match level {
            StatusLevel::Info => println!("{message}"),
            StatusLevel::Error => eprintln!("error: {message}"),
        }
    }
}

fn print_asset(asset: &Asset) {
    println!("{}", asset.name);
    if let Some(id) = asset.id {
        println!("  id:          {id}");
    }
    println!("  path:        {}", asset.path.display());
    println!("  tags:        {}", asset.tags.join(", "));
    if !asset.description.is_empty() {
        println!("  description: {}", asset.description);
    }
    if asset.icon.is_some() {
        println!("  icon:        yes");
    }
    println!("  content:     {} file(s)", asset.scenes.len());
    for scene in &asset.scenes {
        println!("    {}", scene.display());
    }
    println!("  gallery:     {} image(s)", asset.gallery.len());
    let dirs = AssetDirs::new(&asset.path);
    match preview_pairs(&dirs.gallery, &dirs.info) {
        Ok(pairs) => {
            for (image, preview) in pairs {
                // '+' marks images whose preview exists
                let mark = if preview.is_some() { "+" } else { " " };
                println!("   {mark} {}", image.display());
            }
        }
        Err(e) => warn!(error = %e, "could not list previews"),
    }
}

/// Forward worker events into the log so long copies stay visible
async fn log_events(mut events: UnboundedReceiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::Started { asset_id, job } => debug!(asset_id, job, "background job started"),
            SyncEvent::Progress { asset_id, percent } => debug!(asset_id, percent, "copying"),
            SyncEvent::FileDone { asset_id, file } => {
                debug!(asset_id, file = %file.display(), "file synced");
            }
            SyncEvent::Finished { asset_id, job } => debug!(asset_id, job, "background job done"),
            SyncEvent::Skipped { asset_id, job } => {
                debug!(asset_id, job, "background job skipped")
            }
            SyncEvent::Failed { asset_id, job, message } => {
                warn!(asset_id, job, message, "background job failed");
            }
        }
    }
}

fn find_by_name(
    library: &AssetLibrary,
    front: &mut ConsoleFront,
    name: &str,
) -> Option<AssetRecord> {
    match library.find_asset(AssetKey::Name(name)) {
        Ok(Some(record)) => Some(record),
        Ok(None) => {
            front.show_status(&format!("no asset named '{name}'"), StatusLevel::Error);
            None
        }
        Err(e) => {
            front.show_status(&e.to_string(), StatusLevel::Error);
            None
        }
    }
}

const HELP: &str = "commands:
  find <terms>        search by name and tags ('and' requires every tag)
  ls [folder]         list assets, optionally under one folder
  open <path>         show one asset folder in detail
  new                 create an asset (interactive form)
  edit <name>         update an asset (interactive form)
  mv <name> <folder>  move an asset under another folder
  rm <name>           quarantine an asset
  tree                show the folder tree
  quit                exit";

fn run_console(library: &mut AssetLibrary, front: &mut ConsoleFront) {
    loop {
        let Some(line) = front.prompt("> ") else {
            break;
        };
        let mut parts = line.splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match command {
            "" => {}
            "quit" | "exit" => break,
            "help" => front.show_status(HELP, StatusLevel::Info),
            "find" => match library.search(rest) {
                Ok(found) => {
                    front.display_assets(&found);
                    match library.related_tags(&found) {
                        Ok(tags) if !tags.is_empty() => front.show_status(
                            &format!("related tags: {}", tags.join(", ")),
                            StatusLevel::Info,
                        ),
                        Ok(_) => {}
                        Err(e) => front.show_status(&e.to_string(), StatusLevel::Error),
                    }
                }
                Err(e) => front.show_status(&e.to_string(), StatusLevel::Error),
            },
            "ls" => {
                let folder = if rest.is_empty() {
                    library.root().to_path_buf()
                } else {
                    PathBuf::from(rest)
                };
                match library.assets_in_folder(&folder) {
                    Ok(found) => front.display_assets(&found),
                    Err(e) => front.show_status(&e.to_string(), StatusLevel::Error),
                }
            }
            "open" => match library.recognize(Path::new(rest)) {
                Ok(asset) => print_asset(&asset),
                Err(e) => front.show_status(&e.to_string(), StatusLevel::Error),
            },
            "new" => {
                let Some(input) = front.form_input() else {
                    break;
                };
                match library.create(input) {
                    Ok(record) => front.show_status(
                        &format!("created '{}', files syncing in the background", record.name),
                        StatusLevel::Info,
                    ),
                    Err(e) => front.show_status(&e.to_string(), StatusLevel::Error),
                }
            }
            "edit" => {
                let Some(record) = find_by_name(library, front, rest) else {
                    continue;
                };
                let Some(mut input) = front.form_input() else {
                    break;
                };
                input.asset_id = Some(record.id);
                match library.edit(input) {
                    Ok(record) => {
                        front.show_status(&format!("updated '{}'", record.name), StatusLevel::Info)
                    }
                    Err(e) => front.show_status(&e.to_string(), StatusLevel::Error),
                }
            }
            "mv" => {
                let mut args = rest.splitn(2, char::is_whitespace);
                let name = args.next().unwrap_or("");
                let folder = args.next().unwrap_or("").trim();
                if name.is_empty() || folder.is_empty() {
                    front.show_status("usage: mv <name> <folder>", StatusLevel::Error);
                    continue;
                }
                let Some(record) = find_by_name(library, front, name) else {
                    continue;
                };
                match library.move_asset(record.id, Path::new(folder)) {
                    Ok(path) => front.show_status(
                        &format!("moved to {}", path.display()),
                        StatusLevel::Info,
                    ),
                    Err(e) => front.show_status(&e.to_string(), StatusLevel::Error),
                }
            }
            "rm" => {
                let Some(record) = find_by_name(library, front, rest) else {
                    continue;
                };
                match library.delete(record.id) {
                    Ok(()) => front.show_status(
                        &format!("'{}' moved to the quarantine folder", record.name),
                        StatusLevel::Info,
                    ),
                    Err(e) => front.show_status(&e.to_string(), StatusLevel::Error),
                }
            }
            "tree" => {
                for folder in library.folder_tree() {
                    let shown = folder.strip_prefix(library.root()).unwrap_or(&folder);
                    println!("  {}", shown.display());
                }
            }
            _ => front.show_status(HELP, StatusLevel::Info),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(root) = env::args().nth(1) else {
        eprintln!("usage: asset-browser <library-root>");
        return ExitCode::from(2);
    };

    let settings = LibrarySettings::new(root);
    let (mut library, events) = match AssetLibrary::open(settings, Box::new(LogNotifier)) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("could not open library: {e}");
            return ExitCode::FAILURE;
        }
    };
    tokio::spawn(log_events(events));

    let count = library.asset_count().unwrap_or(0);
    println!("{} asset(s) in {}", count, library.root().display());
    println!("type 'help' for commands");

    let mut front = ConsoleFront::new();
    run_console(&mut library, &mut front);
    ExitCode::SUCCESS
}
