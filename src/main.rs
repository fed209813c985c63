use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use localrepo::{Entry, Folder, Repository, RepositoryConfig};

/// localrepo - local hierarchical repository store
///
/// Opens the repository configured through `LOCALREPO_*` environment
/// variables, creating it when missing, and prints its tree: folders first,
/// then data entries tagged with their type.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RepositoryConfig::from_env();
    tracing::info!("Using repository root {}", config.root_path.display());
    let repository = Repository::open(config)?;

    println!("{}", repository.root().location());
    print_folder(repository.root(), 1)?;
    Ok(())
}

fn print_folder(folder: &Arc<Folder>, depth: usize) -> localrepo::Result<()> {
    let indent = "  ".repeat(depth);
    for entry in folder.get_entries()? {
        match &entry {
            Entry::Folder(subfolder) => {
                let marker = if subfolder.is_connections_folder() { " [connections]" } else { "" };
                println!("{}{}/{}", indent, subfolder.name(), marker);
                print_folder(subfolder, depth + 1)?;
            }
            Entry::Data(data) => println!("{}{} ({})", indent, data.name(), data.entry_type()),
        }
    }
    Ok(())
}
