//! Module for generating synthetic heart rate samples.
//!
//! Two strategies are available: independent zone weighted sampling spread over calendar days and
//! a bounded random walk with a fixed time increment.
use std::ops::RangeInclusive;
use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Sample;
use crate::storage::{self, FileLayout, StorageError};

/// Timestamp format of the random walk and of re-stamped samples.
pub static TIMESTAMP_FORMAT_UTC: &'static str = "%Y-%m-%dT%H:%M:%SZ";
/// Timestamp format of the zone weighted generator (local calendar time without offset).
pub static TIMESTAMP_FORMAT_NAIVE: &'static str = "%Y-%m-%dT%H:%M:%S";

const MINUTES_PER_DAY: i64 = 24 * 60;
/// Largest accepted gap between two random walk samples.
const MAX_TIME_INCREMENT_MINUTES: i64 = 365 * MINUTES_PER_DAY;

#[derive(Error, Debug, PartialEq)]
pub enum GeneratorError {
    #[error("zone thresholds must satisfy 0 < z1 < z2 < z3 <= u32::MAX - 40, got {z1}/{z2}/{z3}")]
    InvalidThresholds { z1: u32, z2: u32, z3: u32 },
    #[error("bpm bounds must satisfy lower <= upper, got {lower}..{upper}")]
    InvalidBounds { lower: u32, upper: u32 },
    #[error("samples per day must satisfy min <= max, got {min}..{max}")]
    InvalidSamplesPerDay { min: u32, max: u32 },
    #[error("time increment must be between 1 and {max} minutes, got {minutes}")]
    InvalidIncrement { minutes: i64, max: i64 },
    #[error("timestamp out of range when moving {start} by {minutes} minutes")]
    TimeOutOfRange { start: DateTime<Utc>, minutes: i64 },
    #[error("calendar day {0} has no midnight")]
    InvalidDay(NaiveDate),
    #[error("invalid zone weights: {0}")]
    Weights(#[from] WeightedError),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Heart rate zone a zone weighted sample is drawn from.
pub enum Zone {
    BelowZ1,
    InZ1,
    InZ2,
    InZ3,
}

/// Zones with their selection weights.
const ZONE_WEIGHTS: [(Zone, f64); 4] = [
    (Zone::BelowZ1, 0.3),
    (Zone::InZ1, 0.3),
    (Zone::InZ2, 0.2),
    (Zone::InZ3, 0.2),
];

/// Width below z1 covered by the `BelowZ1` band.
const BELOW_Z1_SPAN: u32 = 30;
/// Width above z3 covered by the `InZ3` band.
const ABOVE_Z3_SPAN: u32 = 40;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
/// Zone boundaries in beats per minute.
pub struct ZoneThresholds
{
    pub z1: u32,
    pub z2: u32,
    pub z3: u32,
}

impl ZoneThresholds {
    pub fn validate(&self) -> Result<(), GeneratorError> {
        if self.z1 == 0 || self.z1 >= self.z2 || self.z2 >= self.z3 || self.z3.checked_add(ABOVE_Z3_SPAN).is_none() {
            return Err(GeneratorError::InvalidThresholds { z1: self.z1, z2: self.z2, z3: self.z3 });
        }
        Ok(())
    }

    /// The inclusive bpm band a zone draws from.
    pub fn band(&self, zone: Zone) -> RangeInclusive<u32> {
        match zone {
            Zone::BelowZ1 => self.z1.saturating_sub(BELOW_Z1_SPAN)..=self.z1 - 1,
            Zone::InZ1 => self.z1..=self.z2 - 1,
            Zone::InZ2 => self.z2..=self.z3 - 1,
            Zone::InZ3 => self.z3..=self.z3.saturating_add(ABOVE_Z3_SPAN),
        }
    }
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        ZoneThresholds { z1: 120, z2: 145, z3: 160 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
/// Physiological bound every random walk sample is clamped to.
pub struct BpmBounds
{
    pub lower: u32,
    pub upper: u32,
}

impl BpmBounds {
    pub fn validate(&self) -> Result<(), GeneratorError> {
        if self.lower > self.upper {
            return Err(GeneratorError::InvalidBounds { lower: self.lower, upper: self.upper });
        }
        Ok(())
    }

    pub fn clamp(&self, bpm: i64) -> u32 {
        if bpm < self.lower as i64 {
            self.lower
        } else if bpm > self.upper as i64 {
            self.upper
        } else {
            bpm as u32
        }
    }
}

impl Default for BpmBounds {
    fn default() -> Self {
        BpmBounds { lower: 60, upper: 195 }
    }
}

fn default_min_samples_per_day() -> u32 { 5 }
fn default_max_samples_per_day() -> u32 { 15 }

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Parameters for the zone weighted generator.
pub struct ZoneParameters
{
    /// First calendar day to generate samples for.
    pub start_date: NaiveDate,
    /// Last calendar day to generate samples for, inclusive.
    pub end_date: NaiveDate,
    /// Zone boundaries.
    #[serde(default)]
    pub thresholds: ZoneThresholds,
    /// Minimum number of samples per day.
    #[serde(default = "default_min_samples_per_day")]
    pub min_samples_per_day: u32,
    /// Maximum number of samples per day.
    #[serde(default = "default_max_samples_per_day")]
    pub max_samples_per_day: u32,
}

impl ZoneParameters {
    pub fn validate(&self) -> Result<(), GeneratorError> {
        self.thresholds.validate()?;
        if self.min_samples_per_day > self.max_samples_per_day {
            return Err(GeneratorError::InvalidSamplesPerDay {
                min: self.min_samples_per_day,
                max: self.max_samples_per_day,
            });
        }
        Ok(())
    }
}

fn default_num_records() -> usize { 20 }
fn default_start_bpm() -> u32 { 70 }
fn default_max_step() -> u32 { 5 }
fn default_time_increment_minutes() -> i64 { 5 }

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Parameters for the random walk generator.
pub struct WalkParameters
{
    /// Number of samples to produce.
    #[serde(default = "default_num_records")]
    pub num_records: usize,
    /// Value the walk starts from.
    #[serde(default = "default_start_bpm")]
    pub start_bpm: u32,
    /// Bound every sample is clamped to.
    #[serde(default)]
    pub bounds: BpmBounds,
    /// Maximum change between two consecutive samples.
    #[serde(default = "default_max_step")]
    pub max_step: u32,
    /// Extra headroom for upward steps.
    #[serde(default)]
    pub upward_bias: u32,
    /// Minutes between two consecutive samples.
    #[serde(default = "default_time_increment_minutes")]
    pub time_increment_minutes: i64,
}

impl WalkParameters {
    pub fn validate(&self) -> Result<(), GeneratorError> {
        self.bounds.validate()?;
        if self.time_increment_minutes < 1 || self.time_increment_minutes > MAX_TIME_INCREMENT_MINUTES {
            return Err(GeneratorError::InvalidIncrement {
                minutes: self.time_increment_minutes,
                max: MAX_TIME_INCREMENT_MINUTES,
            });
        }
        Ok(())
    }

    /// Inclusive range a single step is drawn from.
    pub fn step_range(&self) -> RangeInclusive<i64> {
        -(self.max_step as i64)..=(self.max_step as i64 + self.upward_bias as i64)
    }
}

impl Default for WalkParameters {
    fn default() -> Self {
        WalkParameters {
            num_records: default_num_records(),
            start_bpm: default_start_bpm(),
            bounds: BpmBounds::default(),
            max_step: default_max_step(),
            upward_bias: 0,
            time_increment_minutes: default_time_increment_minutes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Strategy used to produce the samples of a single user.
pub enum GenerationStrategy {
    ZoneWeighted(ZoneParameters),
    RandomWalk(WalkParameters),
}

impl GenerationStrategy {
    /// Generates the samples for `username`.
    ///
    /// `start` is the instant of the first random walk sample, the zone weighted strategy uses its
    /// configured calendar days instead.
    pub fn generate<R: Rng + ?Sized>(&self, username: &str, rng: &mut R, start: DateTime<Utc>) -> Result<Vec<Sample>, GeneratorError> {
        match self {
            GenerationStrategy::ZoneWeighted(params) => generate_zone_weighted(username, params, rng),
            GenerationStrategy::RandomWalk(params) => generate_random_walk(username, params, start, rng),
        }
    }
}

/// Moves a point in time by a number of minutes, failing instead of leaving the supported range.
pub fn advance(time: DateTime<Utc>, minutes: i64) -> Result<DateTime<Utc>, GeneratorError> {
    Duration::try_minutes(minutes)
        .and_then(|delta| time.checked_add_signed(delta))
        .ok_or(GeneratorError::TimeOutOfRange { start: time, minutes })
}

/// Draws the zone of the next sample.
pub fn pick_zone<R: Rng + ?Sized>(selector: &WeightedIndex<f64>, rng: &mut R) -> Zone {
    ZONE_WEIGHTS[selector.sample(rng)].0
}

/// Generates zone weighted samples for every day in the configured date range.
///
/// # Returns
///
/// * `Ok(samples)` - The samples sorted ascending by timestamp.
///
/// * `Err(...)` - If the parameters are invalid.
///
pub fn generate_zone_weighted<R: Rng + ?Sized>(username: &str, params: &ZoneParameters, rng: &mut R) -> Result<Vec<Sample>, GeneratorError>
{
    params.validate()?;
    let selector = WeightedIndex::new(ZONE_WEIGHTS.iter().map(|(_, weight)| *weight))?;

    let mut points: Vec<(DateTime<Utc>, u32)> = Vec::new();
    let mut current_date = params.start_date;
    while current_date <= params.end_date {
        let midnight = current_date.and_hms_opt(0, 0, 0).ok_or(GeneratorError::InvalidDay(current_date))?;
        let day_start = Utc.from_utc_datetime(&midnight);
        let samples_today = rng.gen_range(params.min_samples_per_day..=params.max_samples_per_day);
        for _ in 0..samples_today {
            let timestamp = advance(day_start, rng.gen_range(0..MINUTES_PER_DAY))?;
            let zone = pick_zone(&selector, rng);
            let bpm = rng.gen_range(params.thresholds.band(zone));
            points.push((timestamp, bpm));
        }

        current_date = match current_date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    points.sort_by_key(|(timestamp, _)| *timestamp);

    log::debug!(target: "hrseed::gen", "Generated {} zone weighted samples for \'{}\'", points.len(), username);

    Ok(points.into_iter()
        .map(|(timestamp, bpm)| Sample {
            username: username.to_string(),
            bpm,
            timestamp: timestamp.format(TIMESTAMP_FORMAT_NAIVE).to_string(),
        })
        .collect())
}

/// Generates a bounded random walk starting at `start`.
pub fn generate_random_walk<R: Rng + ?Sized>(username: &str, params: &WalkParameters, start: DateTime<Utc>, rng: &mut R) -> Result<Vec<Sample>, GeneratorError>
{
    params.validate()?;

    let mut samples = Vec::with_capacity(params.num_records);
    let mut current_bpm = params.start_bpm;
    let mut current_time = start;

    for index in 0..params.num_records {
        if index > 0 {
            current_time = advance(current_time, params.time_increment_minutes)?;
        }
        let fluctuation = rng.gen_range(params.step_range());
        current_bpm = params.bounds.clamp(current_bpm as i64 + fluctuation);

        samples.push(Sample {
            username: username.to_string(),
            bpm: current_bpm,
            timestamp: current_time.format(TIMESTAMP_FORMAT_UTC).to_string(),
        });
    }

    log::debug!(target: "hrseed::gen", "Generated {} random walk samples for \'{}\'", samples.len(), username);

    Ok(samples)
}

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn default_users() -> Vec<String> { vec![String::from("user_a"), String::from("user_b"), String::from("user_c")] }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }
fn default_walk_layout() -> FileLayout { FileLayout::Container }

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Parameters for the generation jobs.
pub struct GeneratorParameters
{
    /// Users to generate a sample file for.
    #[serde(default = "default_users")]
    pub users: Vec<String>,
    /// Directory the sample files are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Only required by the zone weighted job.
    #[serde(default)]
    pub zones: Option<ZoneParameters>,
    #[serde(default)]
    pub walk: WalkParameters,
    /// File layout of zone weighted samples.
    #[serde(default)]
    pub zones_layout: FileLayout,
    /// File layout of random walk samples.
    #[serde(default = "default_walk_layout")]
    pub walk_layout: FileLayout,
}

impl GeneratorParameters {
    pub fn validate(&self) -> Result<(), GeneratorError> {
        if let Some(zones) = &self.zones {
            zones.validate()?;
        }
        self.walk.validate()
    }
}

impl Default for GeneratorParameters {
    fn default() -> Self {
        GeneratorParameters {
            users: default_users(),
            output_dir: default_output_dir(),
            zones: None,
            walk: WalkParameters::default(),
            zones_layout: FileLayout::default(),
            walk_layout: default_walk_layout(),
        }
    }
}

/// Generates and stores the samples of every configured user.
///
/// # Returns
///
/// * `Ok(paths)` - The files written, one per user.
///
/// * `Err(...)` - If the parameters are invalid or a file cannot be written. Files written before
///     the failure are kept.
///
pub fn generate_files<R: Rng + ?Sized>(params: &GeneratorParameters, strategy: &GenerationStrategy, rng: &mut R, now: DateTime<Utc>) -> Result<Vec<PathBuf>, GenerateError>
{
    let layout = match strategy {
        GenerationStrategy::ZoneWeighted(_) => params.zones_layout,
        GenerationStrategy::RandomWalk(_) => params.walk_layout,
    };

    std::fs::create_dir_all(&params.output_dir)
        .map_err(|source| StorageError::Io { path: params.output_dir.clone(), source })?;

    let mut written = Vec::with_capacity(params.users.len());
    for username in &params.users {
        let samples = strategy.generate(username, rng, now)?;
        let path = storage::user_file_path(&params.output_dir, username);
        storage::write_samples(&path, &samples, layout)?;
        written.push(path);
    }

    log::info!(target: "hrseed::gen", "Heart rate data generated for {} users", written.len());
    Ok(written)
}
