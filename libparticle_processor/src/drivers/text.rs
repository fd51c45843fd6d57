use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::Path;

use crate::error::DriverError;

/// Read a whole text file, logging its size
pub fn read_text(path: &Path) -> Result<String, DriverError> {
    if !path.exists() {
        return Err(DriverError::BadFilePath(path.to_path_buf()));
    }
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    spdlog::info!(
        "Reading {} ({})",
        path.display(),
        human_bytes::human_bytes(size as f64)
    );
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Read a whole binary file, logging its size
pub fn read_bytes(path: &Path) -> Result<Vec<u8>, DriverError> {
    if !path.exists() {
        return Err(DriverError::BadFilePath(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    spdlog::info!(
        "Reading {} ({})",
        path.display(),
        human_bytes::human_bytes(bytes.len() as f64)
    );
    Ok(bytes)
}

pub fn create_writer(path: &Path) -> Result<BufWriter<File>, DriverError> {
    Ok(BufWriter::new(File::create(path)?))
}

/// Split a whitespace separated line into floats. `line` is 1-based and only used for errors.
pub fn parse_floats(text: &str, line: usize) -> Result<Vec<f64>, DriverError> {
    text.split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|e| DriverError::BadFormat {
                line,
                reason: format!("{token:?} is not a number ({e})"),
            })
        })
        .collect()
}

/// Parse a line that must hold exactly `count` floats
pub fn parse_row(text: &str, line: usize, count: usize) -> Result<Vec<f64>, DriverError> {
    let values = parse_floats(text, line)?;
    if values.len() != count {
        return Err(DriverError::BadFormat {
            line,
            reason: format!("expected {count} columns, found {}", values.len()),
        });
    }
    Ok(values)
}

/// Lower-case extension of a path, without the dot
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_row() {
        assert_eq!(parse_row(" 1.0\t2e-3  -4 ", 3, 3).unwrap(), vec![1.0, 2e-3, -4.0]);
        assert!(matches!(
            parse_row("1.0 2.0", 7, 3),
            Err(DriverError::BadFormat { line: 7, .. })
        ));
        assert!(matches!(
            parse_floats("1.0 abc", 2),
            Err(DriverError::BadFormat { line: 2, .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.txt");
        assert!(matches!(read_text(&path), Err(DriverError::BadFilePath(_))));
        assert_eq!(extension(Path::new("a/b.H5")), Some(String::from("h5")));
    }
}
