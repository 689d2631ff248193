//! Streaming JSONL manifest readers and writers.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use minidp_types::{PipelineError, Record};

/// Lazy single-pass reader over a JSONL manifest.
///
/// Yields one parsed record per non-empty line. Not restartable; the file
/// handle is released when the reader is dropped, on all exit paths.
#[derive(Debug)]
pub struct ManifestReader {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_no: u64,
}

impl ManifestReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        let file =
            File::open(&path).map_err(|e| PipelineError::manifest_open(&path, e.to_string()))?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for ManifestReader {
    type Item = Result<Record, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(PipelineError::manifest_read(
                        &self.path,
                        self.line_no + 1,
                        e.to_string(),
                    )))
                }
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str::<Record>(trimmed).map_err(|e| {
                    PipelineError::manifest_read(&self.path, self.line_no, e.to_string())
                }),
            );
        }
    }
}

/// Truncating JSONL writer.
///
/// Serializes each record as one compact JSON line with a trailing newline.
/// `finish` flushes; on error the partial file is left in place for
/// diagnosis.
pub struct ManifestWriter {
    path: PathBuf,
    out: BufWriter<File>,
    count: u64,
}

impl ManifestWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PipelineError::manifest_write(&path, e.to_string()))?;
            }
        }
        let file =
            File::create(&path).map_err(|e| PipelineError::manifest_write(&path, e.to_string()))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            count: 0,
        })
    }

    pub fn write(&mut self, record: &Record) -> Result<(), PipelineError> {
        serde_json::to_writer(&mut self.out, record)
            .map_err(|e| PipelineError::manifest_write(&self.path, e.to_string()))?;
        self.out
            .write_all(b"\n")
            .map_err(|e| PipelineError::write_io(&self.path, &e))?;
        self.count += 1;
        Ok(())
    }

    /// Flush and close, returning the number of records written.
    pub fn finish(mut self) -> Result<u64, PipelineError> {
        self.out
            .flush()
            .map_err(|e| PipelineError::write_io(&self.path, &e))?;
        Ok(self.count)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a whole manifest into memory. Missing files read as empty.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<Record>, PipelineError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    ManifestReader::open(path)?.collect()
}

/// True when the path exists and has content.
pub fn is_nonempty_file(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path.as_ref())
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_roundtrip_preserves_records_and_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.jsonl");

        let mut writer = ManifestWriter::create(&path).unwrap();
        writer.write(&record(&[("a", json!(1))])).unwrap();
        writer.write(&record(&[("a", json!(2))])).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let records: Vec<Record> = ManifestReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["a"], json!(1));
        assert_eq!(records[1]["a"], json!(2));
    }

    #[test]
    fn test_reader_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.jsonl");
        std::fs::write(&path, "{\"a\":1}\n\n   \n{\"a\":2}\n").unwrap();

        let records: Vec<Record> = ManifestReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_reader_reports_line_number_on_bad_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.jsonl");
        std::fs::write(&path, "{\"a\":1}\nnot json\n").unwrap();

        let result: Result<Vec<Record>, _> = ManifestReader::open(&path).unwrap().collect();
        let err = result.unwrap_err().to_string();
        assert!(err.contains("m.jsonl:2"), "got: {err}");
    }

    #[test]
    fn test_reader_missing_file_errors() {
        let err = ManifestReader::open("/definitely/not/here.jsonl").unwrap_err();
        assert!(matches!(err, PipelineError::ManifestRead { line: 0, .. }));
    }

    #[test]
    fn test_writer_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deep/m.jsonl");
        let mut writer = ManifestWriter::create(&path).unwrap();
        writer.write(&record(&[("x", json!(true))])).unwrap();
        writer.finish().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_writer_emits_one_compact_line_per_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.jsonl");
        let mut writer = ManifestWriter::create(&path).unwrap();
        writer
            .write(&record(&[("a", json!([1, 2])), ("b", json!("x"))]))
            .unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\"a\":[1,2],\"b\":\"x\"}\n");
    }

    #[test]
    fn test_writer_truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.jsonl");
        std::fs::write(&path, "{\"old\":1}\n{\"old\":2}\n").unwrap();

        let writer = ManifestWriter::create(&path).unwrap();
        assert_eq!(writer.finish().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_read_records_missing_file_is_empty() {
        assert!(read_records("/no/such/file.jsonl").unwrap().is_empty());
    }

    #[test]
    fn test_is_nonempty_file() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.jsonl");
        std::fs::write(&empty, "").unwrap();
        let full = dir.path().join("full.jsonl");
        std::fs::write(&full, "{\"a\":1}\n").unwrap();

        assert!(!is_nonempty_file(dir.path().join("missing.jsonl")));
        assert!(!is_nonempty_file(&empty));
        assert!(is_nonempty_file(&full));
    }
}
