//! Kernel source loading
//!
//! Sources are looked up by a relative resource path under an ordered list of
//! root directories, the first root containing the file wins.

use crate::config::SessionConfig;
use crate::error::{ComputeError, Result};
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};

/// Resolves resource paths to kernel source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoader {
    roots: Vec<PathBuf>,
}

impl SourceLoader {
    /// Loader with a single source root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
        }
    }

    /// Loader over the configured source roots
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            roots: config.source_roots.clone(),
        }
    }

    /// Append a search root
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// Search roots, in lookup order
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve `path` to an existing file under one of the roots
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let confined = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return Err(ComputeError::SourceNotFound {
                path: path.to_string(),
            });
        }

        self.roots
            .iter()
            .map(|root| root.join(relative))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ComputeError::SourceNotFound {
                path: path.to_string(),
            })
    }

    /// Read the whole source named by `path`
    ///
    /// Every line of the result ends with `\n`; CRLF line endings are
    /// normalized. The file is closed before returning on every path.
    pub fn load(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        let read_error = |source| ComputeError::SourceRead {
            path: path.to_string(),
            source,
        };

        let reader = BufReader::new(File::open(&resolved).map_err(read_error)?);
        let mut text = String::new();
        for line in reader.lines() {
            text.push_str(&line.map_err(read_error)?);
            text.push('\n');
        }

        debug!(
            "Loaded kernel source {} ({} bytes)",
            resolved.display(),
            text.len()
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn root_with(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_load_terminates_every_line() {
        let dir = root_with(&[("noop.cl", "__kernel void noop() {\n}")]);
        let loader = SourceLoader::new(dir.path());
        assert_eq!(loader.load("noop.cl").unwrap(), "__kernel void noop() {\n}\n");
    }

    #[test]
    fn test_load_normalizes_crlf() {
        let dir = root_with(&[("crlf.cl", "a\r\nb\r\n")]);
        let loader = SourceLoader::new(dir.path());
        assert_eq!(loader.load("crlf.cl").unwrap(), "a\nb\n");
    }

    #[test]
    fn test_load_empty_file() {
        let dir = root_with(&[("empty.cl", "")]);
        let loader = SourceLoader::new(dir.path());
        assert_eq!(loader.load("empty.cl").unwrap(), "");
    }

    #[test]
    fn test_first_root_wins() {
        let first = root_with(&[("nested/k.cl", "first")]);
        let second = root_with(&[("nested/k.cl", "second"), ("only.cl", "fallback")]);
        let loader = SourceLoader::new(first.path()).with_root(second.path());

        assert_eq!(loader.load("nested/k.cl").unwrap(), "first\n");
        assert_eq!(loader.load("only.cl").unwrap(), "fallback\n");
    }

    #[rstest]
    #[case("missing.cl")]
    #[case("")]
    #[case("../escape.cl")]
    #[case("/etc/hostname")]
    #[case("nested")]
    fn test_unresolvable_paths(#[case] path: &str) {
        let dir = root_with(&[("nested/k.cl", "x")]);
        let loader = SourceLoader::new(dir.path());
        let err = loader.load(path).unwrap_err();
        assert!(
            matches!(&err, ComputeError::SourceNotFound { path: p } if p == path),
            "unexpected error: {:?}",
            err
        );
    }

    #[test]
    fn test_invalid_utf8_is_read_error() {
        let dir = root_with(&[]);
        fs::write(dir.path().join("bad.cl"), [0x66, 0xff, 0xfe, 0x0a]).unwrap();
        let loader = SourceLoader::new(dir.path());
        let err = loader.load("bad.cl").unwrap_err();
        assert!(matches!(err, ComputeError::SourceRead { .. }), "{:?}", err);
    }

    #[test]
    fn test_from_config_uses_roots() {
        let config = SessionConfig::default().with_source_root("/opt/kernels");
        let loader = SourceLoader::from_config(&config);
        assert_eq!(loader.roots(), &[PathBuf::from("/opt/kernels")]);
    }
}
