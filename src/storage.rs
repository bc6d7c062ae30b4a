//! Module for persisting generated samples as JSON files.
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{Sample, SampleContainer};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file {} not found", .0.display())]
    FileNotFound(PathBuf),
    #[error("cannot access {}: {}", .path.display(), .source)]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot decode {}: {}", .path.display(), .source)]
    Json { path: PathBuf, source: serde_json::Error },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Layout of a sample file.
pub enum FileLayout {
    /// A bare JSON array of samples.
    Array,
    /// An object wrapping the samples in a `data` field.
    Container,
}

impl Default for FileLayout {
    fn default() -> Self {
        FileLayout::Array
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SampleFile {
    Array(Vec<Sample>),
    Container(SampleContainer),
}

/// Path of the sample file of a user inside `directory`.
pub fn user_file_path(directory: &Path, username: &str) -> PathBuf {
    directory.join(format!("{}_heart_rate_data.json", username))
}

/// Writes the samples pretty printed in the requested layout.
pub fn write_samples(path: &Path, samples: &[Sample], layout: FileLayout) -> Result<(), StorageError>
{
    let file = File::create(path).map_err(|source| StorageError::Io { path: path.to_path_buf(), source })?;
    let mut writer = BufWriter::new(file);

    let result = match layout {
        FileLayout::Array => serde_json::to_writer_pretty(&mut writer, samples),
        FileLayout::Container => serde_json::to_writer_pretty(&mut writer, &SampleContainer { data: samples.to_vec() }),
    };
    result.map_err(|source| StorageError::Json { path: path.to_path_buf(), source })?;

    writer.flush().map_err(|source| StorageError::Io { path: path.to_path_buf(), source })?;
    log::info!(target: "hrseed::file", "Wrote {} samples to \'{}\'", samples.len(), path.display());
    Ok(())
}

/// Reads a sample file in either layout.
///
/// # Errors
///
/// * `StorageError::FileNotFound` - The file does not exist.
///
/// * `StorageError::Io` - The file exists but cannot be opened.
///
/// * `StorageError::Json` - The content is neither a sample array nor a sample container.
///
pub fn read_samples(path: &Path) -> Result<Vec<Sample>, StorageError>
{
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(StorageError::FileNotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(StorageError::Io { path: path.to_path_buf(), source });
        }
    };

    let samples = match serde_json::from_reader::<_, SampleFile>(BufReader::new(file)) {
        Ok(SampleFile::Array(samples)) => samples,
        Ok(SampleFile::Container(container)) => container.data,
        Err(source) => return Err(StorageError::Json { path: path.to_path_buf(), source }),
    };

    log::debug!(target: "hrseed::file", "Read {} samples from \'{}\'", samples.len(), path.display());
    Ok(samples)
}
