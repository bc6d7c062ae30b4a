//! Streams a freshly generated random walk to the ingest endpoint, one request per sample.
use std::convert::TryFrom;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generator::{advance, generate_random_walk, BpmBounds, GeneratorError, WalkParameters};
use crate::sender::{send_records, RecordReport, SuccessPolicy};
use crate::transport::{Transport, TransportParameters};

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("cannot generate samples: {0}")]
    Generator(#[from] GeneratorError),
    #[error("stream aborted after {attempts} requests, could not connect to {endpoint}: {reason}")]
    ConnectionFailure { endpoint: String, reason: String, attempts: usize },
}

fn default_endpoint() -> String { String::from("http://localhost:3000/api/heart-rate") }
fn default_username() -> String { String::from("test_runner_01") }
fn default_duration_minutes() -> usize { 60 }
fn default_pause_millis() -> u64 { 100 }
fn default_policy() -> SuccessPolicy { SuccessPolicy::AnySuccess }
fn default_walk() -> WalkParameters {
    WalkParameters {
        num_records: default_duration_minutes(),
        start_bpm: 75,
        bounds: BpmBounds { lower: 60, upper: 185 },
        max_step: 3,
        upward_bias: 1,
        time_increment_minutes: 1,
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Parameters for streaming a live random walk.
pub struct StreamParameters
{
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_username")]
    pub username: String,
    /// Minutes covered by the stream, one sample per minute ending at the start of the run.
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: usize,
    /// Shape of the walk. `num_records` and `time_increment_minutes` are derived from the duration.
    #[serde(default = "default_walk")]
    pub walk: WalkParameters,
    /// Pause between two requests.
    #[serde(default = "default_pause_millis")]
    pub pause_millis: u64,
    #[serde(default = "default_policy")]
    pub policy: SuccessPolicy,
    #[serde(default)]
    pub transport: TransportParameters,
}

impl Default for StreamParameters {
    fn default() -> Self {
        StreamParameters {
            endpoint: default_endpoint(),
            username: default_username(),
            duration_minutes: default_duration_minutes(),
            walk: default_walk(),
            pause_millis: default_pause_millis(),
            policy: default_policy(),
            transport: TransportParameters::default(),
        }
    }
}

/// Generates `duration_minutes` samples ending at `now` and sends them one by one.
///
/// # Errors
///
/// * `StreamError::ConnectionFailure` - The endpoint became unreachable, the remaining samples
///     were not sent. The run is expected to terminate.
///
pub fn run_stream<R: Rng + ?Sized>(transport: &dyn Transport, params: &StreamParameters, rng: &mut R, now: DateTime<Utc>) -> Result<RecordReport, StreamError>
{
    let walk = WalkParameters {
        num_records: params.duration_minutes,
        time_increment_minutes: 1,
        ..params.walk.clone()
    };
    let minutes = i64::try_from(params.duration_minutes).unwrap_or(i64::MAX);
    let start = advance(now, -minutes)?;
    let samples = generate_random_walk(&params.username, &walk, start, rng)?;

    log::info!(target: "hrseed::stream", "Starting data seed to \'{}\' with {} entries", params.endpoint, samples.len());

    let report = send_records(transport, &params.endpoint, &samples, &params.policy, Duration::from_millis(params.pause_millis));

    log::info!(target: "hrseed::stream", "Completed. Success: {}, Failed: {}", report.success, report.failure);

    match report.abort_reason {
        Some(reason) => Err(StreamError::ConnectionFailure {
            endpoint: params.endpoint.clone(),
            reason,
            attempts: report.attempts,
        }),
        None => Ok(report),
    }
}
