//! Flat-text numeric matrix files
//!
//! One row per line, values separated by whitespace. This is the on-disk
//! format of the velvet-noise filter banks.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::{SwError, SwResult};

fn resource_error(path: &Path, source: io::Error) -> SwError {
    SwError::ResourceLoad {
        path: path.display().to_string(),
        source,
    }
}

/// Parse a whitespace-delimited matrix from text.
///
/// Blank lines and lines starting with `#` are skipped. Every row must have
/// the same number of columns.
pub fn parse_matrix(text: &str) -> io::Result<Vec<Vec<f64>>> {
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|tok| !tok.is_empty())
            .map(|tok| {
                tok.parse::<f64>().map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("line {}: cannot parse {tok:?}: {e}", line_no + 1),
                    )
                })
            })
            .collect::<io::Result<Vec<f64>>>()?;

        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "line {}: expected {} columns, found {}",
                        line_no + 1,
                        first.len(),
                        row.len()
                    ),
                ));
            }
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Load a matrix file. Any failure is reported as [`SwError::ResourceLoad`].
pub fn load_matrix(path: impl AsRef<Path>) -> SwResult<Vec<Vec<f64>>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| resource_error(path, e))?;
    let rows = parse_matrix(&text).map_err(|e| resource_error(path, e))?;
    log::debug!(
        "Loaded {}x{} matrix from {}",
        rows.len(),
        rows.first().map_or(0, Vec::len),
        path.display()
    );
    Ok(rows)
}

/// Write a matrix, creating parent directories as needed
pub fn save_matrix(path: impl AsRef<Path>, rows: &[Vec<f64>]) -> SwResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(fs::File::create(path)?);
    for row in rows {
        let line = row
            .iter()
            .map(|v| format!("{v:.18e}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matrix() {
        let rows = parse_matrix("# header\n1 2 3\n\n4.5e0 -5 6\n").unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0, 3.0], vec![4.5, -5.0, 6.0]]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = parse_matrix("1 2\n3\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bank.txt");
        let rows = vec![vec![1.0, 0.0, -0.25], vec![0.0, 1.0, 1e-9]];

        save_matrix(&path, &rows).unwrap();
        let loaded = load_matrix(&path).unwrap();
        assert_eq!(loaded, rows);
    }

    #[test]
    fn test_missing_file_is_resource_error() {
        let err = load_matrix("/definitely/not/here.txt").unwrap_err();
        assert!(matches!(err, SwError::ResourceLoad { .. }));
    }
}
