// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

#[allow(clippy::module_name_repetitions)]
pub fn absolute_path<P: AsRef<Path>>(path: P) -> std::io::Result<PathBuf> {
    path.as_ref().absolutize().map(std::borrow::Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn absolute_path_keeps_absolute() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(dir.path(), absolute_path(dir.path())?);
        Ok(())
    }

    #[test]
    fn absolute_path_resolves_relative() -> std::io::Result<()> {
        let path = absolute_path("data/../db")?;
        assert!(path.is_absolute());
        assert!(path.ends_with("db"));
        assert!(!path.to_string_lossy().contains(".."));
        Ok(())
    }
}
