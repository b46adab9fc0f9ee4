//! Persisted JSON state: the merged rate cache, the append-only update
//! history and user portfolios. All writes go through an atomic
//! write-temp-then-rename so readers never observe a partial file.

pub mod portfolios;
pub mod rates;

use crate::error::RateError;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Serializes `value` to `<path>.tmp` and renames it over `path`.
pub(crate) fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");

        atomic_write_json(&path, &vec![1, 2, 3]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed: Vec<i32> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, vec![1, 2, 3]);
        // No temp file left behind
        assert!(!path.with_extension("json.tmp").exists());
    }
}
