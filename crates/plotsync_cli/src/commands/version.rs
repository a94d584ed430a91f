//! Version command implementation.

use plotsync_engine::{version_key, FileVersionStore, VersionStore};
use std::path::Path;

/// Reads a project's version, or advances it to `set`.
///
/// Returns the version in the store afterwards. A `set` lower than the
/// stored value is ignored, as the engine would.
pub fn apply(store: &Path, project_id: &str, set: Option<u64>) -> Result<u64, Box<dyn std::error::Error>> {
    let store = FileVersionStore::open(store)?;
    let key = version_key(project_id);
    let current = store.load(&key)?.unwrap_or(0);

    match set {
        Some(requested) if requested > current => {
            store.store(&key, requested)?;
            Ok(requested)
        }
        Some(requested) => {
            eprintln!("Ignoring {requested}: not newer than stored version {current}");
            Ok(current)
        }
        None => Ok(current),
    }
}

/// Runs the version command.
pub fn run(store: &Path, project_id: &str, set: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let version = apply(store, project_id, set)?;
    println!("{project_id}: {version}");
    Ok(())
}
