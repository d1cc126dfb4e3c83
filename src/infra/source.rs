//! Ready-made identifier sources.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::core::error::AppResult;
use crate::core::source::IdentifierSource;

/// Source over identifiers held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    identifiers: Vec<String>,
    batch_ref: Option<String>,
    position: usize,
}

impl InMemorySource {
    /// Source yielding `identifiers` in order.
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            batch_ref: None,
            position: 0,
        }
    }

    /// Attach a batch reference.
    #[must_use]
    pub fn with_batch_ref(mut self, batch_ref: impl Into<String>) -> Self {
        self.batch_ref = Some(batch_ref.into());
        self
    }
}

impl IdentifierSource for InMemorySource {
    fn open(&mut self) -> AppResult<()> {
        self.position = 0;
        Ok(())
    }

    fn total_count(&self) -> u64 {
        self.identifiers.len() as u64
    }

    fn batch_ref(&self) -> Option<String> {
        self.batch_ref.clone()
    }

    fn next_identifier(&mut self) -> AppResult<Option<String>> {
        let next = self.identifiers.get(self.position).cloned();
        if next.is_some() {
            self.position += 1;
        }
        Ok(next)
    }
}

/// Source reading one identifier per line from a text file.
///
/// The total is the number of non-blank lines, counted on `open`.
#[derive(Debug)]
pub struct LineFileSource {
    path: PathBuf,
    total: u64,
    reader: Option<BufReader<File>>,
}

impl LineFileSource {
    /// Source over the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            total: 0,
            reader: None,
        }
    }

    /// File being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_reader(&self) -> AppResult<BufReader<File>> {
        let file = File::open(&self.path)
            .with_context(|| format!("cannot open identifier file {}", self.path.display()))?;
        Ok(BufReader::new(file))
    }
}

impl IdentifierSource for LineFileSource {
    fn open(&mut self) -> AppResult<()> {
        let mut total = 0;
        for line in self.open_reader()?.lines() {
            if !line?.trim().is_empty() {
                total += 1;
            }
        }
        self.total = total;
        self.reader = Some(self.open_reader()?);
        Ok(())
    }

    fn total_count(&self) -> u64 {
        self.total
    }

    fn next_identifier(&mut self) -> AppResult<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            anyhow::bail!("identifier file {} is not open", self.path.display());
        };
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let identifier = line.trim();
            if !identifier.is_empty() {
                return Ok(Some(identifier.to_string()));
            }
        }
    }

    fn close(&mut self) -> AppResult<()> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn in_memory_source_yields_in_order() {
        let mut source = InMemorySource::new(["a", "b"]).with_batch_ref("batch-7");
        source.open().unwrap();
        assert_eq!(source.total_count(), 2);
        assert_eq!(source.batch_ref().as_deref(), Some("batch-7"));
        assert_eq!(source.next_identifier().unwrap().as_deref(), Some("a"));
        assert_eq!(source.next_identifier().unwrap().as_deref(), Some("b"));
        assert_eq!(source.next_identifier().unwrap(), None);
    }

    #[test]
    fn line_file_source_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "/doc/1.xml\n\n  /doc/2.xml  \n").unwrap();

        let mut source = LineFileSource::new(file.path());
        source.open().unwrap();
        assert_eq!(source.total_count(), 2);
        assert_eq!(source.next_identifier().unwrap().as_deref(), Some("/doc/1.xml"));
        assert_eq!(source.next_identifier().unwrap().as_deref(), Some("/doc/2.xml"));
        assert_eq!(source.next_identifier().unwrap(), None);
        source.close().unwrap();
        assert!(source.next_identifier().is_err());
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = LineFileSource::new(dir.path().join("ids.txt"));
        assert!(source.open().is_err());
    }
}
