use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ExposureError, Result};

/// A header row plus string cells, as read from or written to CSV. Every row
/// is kept at header width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers, rows: Vec::new() }
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ExposureError::MissingInput(path.to_path_buf()));
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut table = Table::new(headers);
        for record in reader.records() {
            let record = record?;
            if record.len() > table.headers.len() {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                return Err(ExposureError::InvalidArgument(format!(
                    "{} line {}: {} fields, header has {}",
                    path.display(),
                    line,
                    record.len(),
                    table.headers.len()
                )));
            }
            table.push_row(record.iter().map(str::to_string).collect());
        }
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Append a row, padding it to header width.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        if row.len() < self.headers.len() {
            row.resize(self.headers.len(), String::new());
        }
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require_column(&self, name: &str, source: &Path) -> Result<usize> {
        self.column(name).ok_or_else(|| ExposureError::MissingColumn {
            column: name.to_string(),
            path: source.to_path_buf(),
        })
    }

    /// Index of `name`, adding an empty column at the end if absent.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Lower-cased file suffix, empty when there is none.
pub(crate) fn suffix(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

pub(crate) fn missing(path: &Path) -> ExposureError {
    ExposureError::MissingInput(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_short_rows_are_padded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.csv");
        fs::write(&path, "ip,port,org\n192.0.2.1,22\n192.0.2.2,80,Acme\n").unwrap();
        let table = Table::read_csv(&path).unwrap();
        assert_eq!(table.rows[0], vec!["192.0.2.1", "22", ""]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_wide_rows_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.csv");
        fs::write(&path, "ip,port\n192.0.2.1,22\n192.0.2.2,22,extra-cell\n").unwrap();
        match Table::read_csv(&path).unwrap_err() {
            ExposureError::InvalidArgument(msg) => {
                assert!(msg.contains("line 3"), "{msg}");
                assert!(msg.contains("3 fields"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = Table::read_csv(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, ExposureError::MissingInput(_)));
    }

    #[test]
    fn test_ensure_column_appends_once() {
        let mut table = Table::new(vec!["port".to_string()]);
        table.push_row(vec!["22".to_string()]);
        let first = table.ensure_column("risk");
        let second = table.ensure_column("risk");
        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(table.headers, vec!["port", "risk"]);
        assert_eq!(table.rows[0], vec!["22", ""]);
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("out.csv");
        let mut table = Table::new(vec!["value".to_string(), "count".to_string()]);
        table.push_row(vec!["22".to_string(), "5".to_string()]);
        table.write_csv(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "value,count\n22,5\n");
    }

    #[test]
    fn test_suffix() {
        assert_eq!(suffix(Path::new("a/b.JSON")), "json");
        assert_eq!(suffix(Path::new("noext")), "");
    }
}
