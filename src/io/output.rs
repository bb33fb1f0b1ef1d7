//! Result output - JSON lines to stdout or a file
//!
//! One JSON object per line so results can be piped into other tools. Logs go
//! to stderr and never mix with this stream.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::debug;

pub struct JsonLines<W: Write> {
    out: W,
    lines: usize,
}

/// Destination picked at runtime
pub type Output = JsonLines<Box<dyn Write>>;

impl JsonLines<Box<dyn Write>> {
    pub fn stdout() -> Self {
        Self::new(Box::new(BufWriter::new(io::stdout())))
    }

    /// Append to a file, creating it (and parent directories) when missing
    pub fn append(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!(path = %path.display(), "output_file_opened");
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    /// Append to `path` when given, stdout otherwise
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        match path {
            Some(path) => Self::append(path),
            None => Ok(Self::stdout()),
        }
    }
}

impl<W: Write> JsonLines<W> {
    pub fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    /// Write one value as a line
    pub fn write<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        self.out.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    /// Write every value, returning how many were written
    pub fn write_all<'a, T, I>(&mut self, values: I) -> io::Result<usize>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut written = 0;
        for value in values {
            self.write(value)?;
            written += 1;
        }
        Ok(written)
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        debug!(lines = %self.lines, "output_flushed");
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Row {
        plate: &'static str,
        count: u64,
    }

    #[test]
    fn test_writes_one_object_per_line() {
        let mut out = JsonLines::new(Vec::new());
        let rows = [Row { plate: "A", count: 3 }, Row { plate: "B", count: 1 }];
        assert_eq!(out.write_all(&rows).unwrap(), 2);

        let bytes = out.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "{\"plate\":\"A\",\"count\":3}\n{\"plate\":\"B\",\"count\":1}\n");
    }

    #[test]
    fn test_append_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.jsonl");

        let mut out = JsonLines::append(&path).unwrap();
        out.write(&Row { plate: "A", count: 1 }).unwrap();
        out.finish().unwrap();

        let mut out = JsonLines::open(Some(&path)).unwrap();
        out.write(&Row { plate: "B", count: 2 }).unwrap();
        out.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
