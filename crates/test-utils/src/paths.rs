//! Temporary locations for on-disk stores.

use std::path::PathBuf;

/// Creates a temporary directory for test stores.
///
/// The directory is removed when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("rl2_test")
        .tempdir()
        .expect("Failed to create temporary test directory")
}

/// Path of a store file named `name` inside `dir`. The file is not created.
pub fn temp_store_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(format!("{}.sqlite", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_store_path() {
        let dir = temp_test_dir();
        let path = temp_store_path(&dir, "ortho");
        assert!(path.starts_with(dir.path()));
        assert!(path.ends_with("ortho.sqlite"));
        assert!(!path.exists());
    }
}
