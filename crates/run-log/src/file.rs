//! Append-only CSV file with a fixed header.

use crate::error::LogError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub(crate) struct CsvFile {
    path: PathBuf,
    file: Option<File>,
}

impl CsvFile {
    /// Create or truncate `path` and write the header line.
    pub(crate) fn create(path: &Path, header: &[&str]) -> Result<Self, LogError> {
        let mut file = File::create(path).map_err(|e| LogError::io(path, e))?;
        write_header(&mut file, path, header)?;
        tracing::debug!("Created log {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Open `path` for appending, keeping its rows.
    ///
    /// A missing or empty file gets the header first; an existing one must
    /// already carry it.
    pub(crate) fn open_append(path: &Path, header: &[&str]) -> Result<Self, LogError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| LogError::io(path, e))?;
        let len = file.metadata().map_err(|e| LogError::io(path, e))?.len();
        if len == 0 {
            write_header(&mut file, path, header)?;
        } else {
            check_header(path, header)?;
        }
        tracing::debug!("Appending to log {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Encode all `rows` first, then write them with a single call.
    ///
    /// Either every row reaches the file or, on an encoding error, none does.
    pub(crate) fn append<R: Serialize>(
        &mut self,
        rows: impl IntoIterator<Item = R>,
    ) -> Result<usize, LogError> {
        let path = &self.path;
        let file = self.file.as_mut().ok_or_else(|| LogError::Closed {
            path: path.clone(),
        })?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        let mut count = 0;
        for row in rows {
            writer.serialize(row).map_err(|e| LogError::csv(path, e))?;
            count += 1;
        }
        let buffer = writer
            .into_inner()
            .map_err(|e| LogError::io(path, e.into_error()))?;
        if !buffer.is_empty() {
            file.write_all(&buffer).map_err(|e| LogError::io(path, e))?;
            file.flush().map_err(|e| LogError::io(path, e))?;
        }
        Ok(count)
    }

    pub(crate) fn close(&mut self) -> Result<(), LogError> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| LogError::io(&self.path, e))?;
        }
        Ok(())
    }
}

fn write_header(file: &mut File, path: &Path, header: &[&str]) -> Result<(), LogError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(header)
        .map_err(|e| LogError::csv(path, e))?;
    let line = writer
        .into_inner()
        .map_err(|e| LogError::io(path, e.into_error()))?;
    file.write_all(&line).map_err(|e| LogError::io(path, e))?;
    file.flush().map_err(|e| LogError::io(path, e))
}

fn open_checked(path: &Path, header: &[&str]) -> Result<csv::Reader<File>, LogError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| LogError::csv(path, e))?;
    let found = reader.headers().map_err(|e| LogError::csv(path, e))?;
    if found.iter().ne(header.iter().copied()) {
        return Err(LogError::Header {
            path: path.to_path_buf(),
            expected: header.join(","),
        });
    }
    Ok(reader)
}

fn check_header(path: &Path, header: &[&str]) -> Result<(), LogError> {
    open_checked(path, header).map(|_| ())
}

/// Read every row of a log, checking its header first.
pub(crate) fn read_rows<R: DeserializeOwned>(
    path: &Path,
    header: &[&str],
) -> Result<Vec<R>, LogError> {
    open_checked(path, header)?
        .deserialize()
        .collect::<Result<Vec<R>, _>>()
        .map_err(|e| LogError::csv(path, e))
}
