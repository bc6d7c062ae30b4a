//! Module that contains all record types exchanged by this application.
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
/// Single heart rate measurement of a user at a specific timestamp.
pub struct Sample
{
    /// The user the measurement belongs to.
    #[serde(alias = "user")]
    pub username: String,
    /// Heart rate in beats per minute.
    pub bpm: u32,
    /// ISO-8601 timestamp of the measurement.
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
/// Container format written by the random walk generator.
pub struct SampleContainer
{
    pub data: Vec<Sample>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch columns are misaligned: {bpm_lines} bpm lines, {timestamp_lines} timestamp lines")]
    Misaligned { bpm_lines: usize, timestamp_lines: usize },
    #[error("invalid bpm value '{0}' in batch")]
    InvalidBpm(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
/// Columnar encoding of all samples of one user.
///
/// `bpm` and `timestamp` hold one line per sample, positionally aligned.
pub struct BatchPayload
{
    pub username: String,
    pub bpm: String,
    pub timestamp: String,
}

impl BatchPayload {
    /// Joins the samples into newline separated columns.
    ///
    /// The username of the payload is taken from the argument, not from the samples.
    pub fn from_samples(username: &str, samples: &[Sample]) -> BatchPayload {
        let bpm = samples.iter()
            .map(|sample| sample.bpm.to_string())
            .collect::<Vec<String>>()
            .join("\n");
        let timestamp = samples.iter()
            .map(|sample| sample.timestamp.as_str())
            .collect::<Vec<&str>>()
            .join("\n");

        BatchPayload {
            username: username.to_string(),
            bpm,
            timestamp,
        }
    }

    /// Number of samples encoded in the payload.
    pub fn len(&self) -> usize {
        if self.bpm.is_empty() {
            0
        } else {
            self.bpm.split('\n').count()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits the columns back into samples.
    pub fn into_samples(self) -> Result<Vec<Sample>, BatchError> {
        let bpm_lines: Vec<&str> = split_column(&self.bpm);
        let timestamp_lines: Vec<&str> = split_column(&self.timestamp);

        if bpm_lines.len() != timestamp_lines.len() {
            return Err(BatchError::Misaligned {
                bpm_lines: bpm_lines.len(),
                timestamp_lines: timestamp_lines.len(),
            });
        }

        bpm_lines.into_iter()
            .zip(timestamp_lines)
            .map(|(bpm, timestamp)| {
                let bpm = bpm.trim().parse::<u32>()
                    .map_err(|_| BatchError::InvalidBpm(bpm.to_string()))?;
                Ok(Sample {
                    username: self.username.clone(),
                    bpm,
                    timestamp: timestamp.to_string(),
                })
            })
            .collect()
    }
}

fn split_column(column: &str) -> Vec<&str> {
    if column.is_empty() {
        Vec::new()
    } else {
        column.split('\n').collect()
    }
}
