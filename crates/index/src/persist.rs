//! Index description persistence
//!
//! Every non-primary index persists its description as
//! `index-<iid>.json` inside the collection directory, where `<iid>` is
//! the decimal form of the 64-bit index id. The file content is the exact
//! JSON returned by [`Index::describe`].

use crate::Index;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use vellum_core::{Error, IndexId, Result};

/// File name of an index description
pub fn description_filename(iid: IndexId) -> String {
    format!("index-{}.json", iid.as_u64())
}

/// Path of an index description inside a collection directory
pub fn description_path(directory: &Path, iid: IndexId) -> PathBuf {
    directory.join(description_filename(iid))
}

/// Persist an index description into the collection directory
pub fn save_description(directory: &Path, index: &dyn Index) -> Result<()> {
    let description = index.describe();
    let path = description_path(directory, index.id());
    debug!(path = %path.display(), "saving index description");

    let body = serde_json::to_string_pretty(&description)?;
    fs::write(&path, body).map_err(|err| {
        error!(path = %path.display(), %err, "cannot save index description");
        Error::Io(err)
    })
}

/// Remove a persisted index description
///
/// Missing files are tolerated; the description may never have been
/// written (for example for the implicit edge index).
pub fn remove_description_file(directory: &Path, iid: IndexId) -> Result<()> {
    let path = description_path(directory, iid);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            error!(path = %path.display(), %err, "cannot remove index description");
            Err(Error::Io(err))
        }
    }
}

/// Load a persisted description back as raw JSON
pub fn load_description(directory: &Path, iid: IndexId) -> Result<serde_json::Value> {
    let path = description_path(directory, iid);
    let body = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&body)?)
}
