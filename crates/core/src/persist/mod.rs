//! JSON persistence for grid layouts and effect profiles.
//!
//! Loading is forgiving: the `*_or_default` entry points log what went wrong
//! and hand back an empty document, so a broken file never blocks startup.

mod layout;
mod profile;

use std::{fs, path::Path};

use serde::{de::DeserializeOwned, Serialize};

pub use layout::{AssignmentRecord, CellRecord, LayoutFile, RestoreReport};
pub use profile::{EffectProfile, ProfileDevice, ProfileEffect, ProfileReport, PROFILE_VERSION};

use crate::Result;

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

pub(crate) fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    match read_json(path) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "could not read {what}, using defaults"
            );
            T::default()
        }
    }
}
