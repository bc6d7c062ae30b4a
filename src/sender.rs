//! Module for sending stored heart rate samples to the ingest endpoint.
//!
//! Samples are either sent one request per record or aggregated into one batch request per user.
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{BatchPayload, Sample};
use crate::restamp::restamp;
use crate::storage::{self, StorageError};
use crate::transport::{Transport, TransportParameters};

#[derive(Error, Debug)]
pub enum SendError {
    #[error("input file {} not found", .0.display())]
    FileNotFound(PathBuf),
    #[error("could not connect to {endpoint}: {reason}")]
    ConnectionFailure { endpoint: String, reason: String },
    #[error("endpoint answered with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<StorageError> for SendError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FileNotFound(path) => SendError::FileNotFound(path),
            other => SendError::Unexpected(other.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Decides which status codes count as a successful delivery.
pub enum SuccessPolicy {
    /// Any status in `[200, 300)`.
    AnySuccess,
    /// Only the listed status codes.
    Codes(Vec<u16>),
}

impl SuccessPolicy {
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            SuccessPolicy::AnySuccess => (200..300).contains(&status),
            SuccessPolicy::Codes(codes) => codes.contains(&status),
        }
    }
}

fn default_endpoint() -> String { String::from("http://localhost:3000/api/heart-rate") }
fn default_users() -> Vec<String> { vec![String::from("user_a"), String::from("user_b"), String::from("user_c")] }
fn default_data_dir() -> PathBuf { PathBuf::from(".") }
fn default_record_policy() -> SuccessPolicy { SuccessPolicy::AnySuccess }
fn default_batch_policy() -> SuccessPolicy { SuccessPolicy::Codes(vec![200, 201]) }

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Parameters for sending stored samples.
pub struct SenderParameters
{
    /// URL every request is posted to.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Users whose sample files are sent, in order.
    #[serde(default = "default_users")]
    pub users: Vec<String>,
    /// Directory containing the `<username>_heart_rate_data.json` files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Success status codes for single record requests.
    #[serde(default = "default_record_policy")]
    pub record_policy: SuccessPolicy,
    /// Success status codes for batch requests.
    #[serde(default = "default_batch_policy")]
    pub batch_policy: SuccessPolicy,
    /// Re-stamp the samples right before sending them.
    #[serde(default)]
    pub restamp: bool,
    /// Pause between two single record requests.
    #[serde(default)]
    pub pause_millis: u64,
    /// HTTP client parameters.
    #[serde(default)]
    pub transport: TransportParameters,
}

impl Default for SenderParameters {
    fn default() -> Self {
        SenderParameters {
            endpoint: default_endpoint(),
            users: default_users(),
            data_dir: default_data_dir(),
            record_policy: default_record_policy(),
            batch_policy: default_batch_policy(),
            restamp: false,
            pause_millis: 0,
            transport: TransportParameters::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// One request per sample.
    PerRecord,
    /// One aggregated request per user.
    Batch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Running counts of the single record requests of one user.
pub struct RecordReport
{
    pub attempts: usize,
    pub success: usize,
    pub failure: usize,
    /// Reason of the connection failure that stopped the remaining records.
    pub abort_reason: Option<String>,
}

impl RecordReport {
    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }
}

#[derive(Debug)]
pub enum UserOutcome {
    /// The samples of the user could not be loaded.
    Skipped(SendError),
    /// Result of the single record requests.
    Records(RecordReport),
    /// Verdict of the batch request with the number of samples it carried.
    Batch(Result<usize, SendError>),
}

#[derive(Debug)]
pub struct UserReport
{
    pub username: String,
    pub outcome: UserOutcome,
}

impl UserReport {
    pub fn is_success(&self) -> bool {
        match &self.outcome {
            UserOutcome::Skipped(_) => false,
            UserOutcome::Records(report) => report.failure == 0 && !report.is_aborted(),
            UserOutcome::Batch(verdict) => verdict.is_ok(),
        }
    }

    /// One line description of the outcome, used for the end of run log.
    pub fn summary(&self) -> String {
        match &self.outcome {
            UserOutcome::Skipped(err) => format!("{}: skipped, {}", self.username, err),
            UserOutcome::Records(report) => match &report.abort_reason {
                Some(reason) => format!("{}: {} sent, {} failed, aborted after {} requests ({})",
                                        self.username, report.success, report.failure, report.attempts, reason),
                None => format!("{}: {} sent, {} failed", self.username, report.success, report.failure),
            },
            UserOutcome::Batch(Ok(count)) => format!("{}: batch of {} accepted", self.username, count),
            UserOutcome::Batch(Err(err)) => format!("{}: batch failed, {}", self.username, err),
        }
    }
}

/// Posts a single sample.
pub fn send_sample(transport: &dyn Transport, endpoint: &str, sample: &Sample, policy: &SuccessPolicy) -> Result<(), SendError>
{
    let body = serde_json::to_value(sample)
        .map_err(|err| SendError::Unexpected(format!("cannot encode sample: {}", err)))?;
    let response = transport.post_json(endpoint, &body)?;
    if policy.accepts(response.status) {
        Ok(())
    } else {
        Err(SendError::HttpStatus { status: response.status, body: response.body })
    }
}

/// Sends the samples one request at a time, in order.
///
/// A connection failure is counted as a failed attempt and stops the remaining samples. Any other
/// failure is counted and the next sample is sent.
pub fn send_records(transport: &dyn Transport, endpoint: &str, samples: &[Sample], policy: &SuccessPolicy, pause: Duration) -> RecordReport
{
    let mut report = RecordReport::default();

    for (index, sample) in samples.iter().enumerate() {
        report.attempts += 1;
        match send_sample(transport, endpoint, sample, policy) {
            Ok(()) => {
                report.success += 1;
                log::debug!(target: "hrseed::send", "[{}/{}] Sent: {} BPM at \'{}\' -> OK", index + 1, samples.len(), sample.bpm, sample.timestamp);
            }
            Err(SendError::ConnectionFailure { endpoint, reason }) => {
                report.failure += 1;
                log::error!(target: "hrseed::send", "[{}/{}] Could not connect to \'{}\': \'{}\'", index + 1, samples.len(), endpoint, reason);
                report.abort_reason = Some(reason);
                break;
            }
            Err(err @ SendError::HttpStatus { .. }) => {
                report.failure += 1;
                log::warn!(target: "hrseed::send", "[{}/{}] Failed to send entry at \'{}\': \'{}\'", index + 1, samples.len(), sample.timestamp, err);
            }
            Err(err) => {
                report.failure += 1;
                log::error!(target: "hrseed::send", "[{}/{}] An unexpected error occurred: \'{}\'", index + 1, samples.len(), err);
            }
        }

        if !pause.is_zero() && index + 1 < samples.len() {
            sleep(pause);
        }
    }

    report
}

/// Sends all samples of a user in one batch request.
///
/// # Returns
///
/// * `Ok(n)` - The endpoint accepted the batch of `n` samples.
///
/// * `Err(...)` - The samples cannot be encoded as aligned columns, or the endpoint could not be
///     reached or rejected the batch. Nothing is posted in the first case.
///
pub fn send_batch(transport: &dyn Transport, endpoint: &str, username: &str, samples: &[Sample], policy: &SuccessPolicy) -> Result<usize, SendError>
{
    let payload = BatchPayload::from_samples(username, samples);
    // A newline inside a value would shift every following line of its column.
    payload.clone().into_samples()
        .map_err(|err| SendError::Unexpected(format!("cannot encode batch: {}", err)))?;
    if payload.is_empty() {
        log::warn!(target: "hrseed::send", "Sending an empty batch for \'{}\'", username);
    }

    let body = serde_json::to_value(&payload)
        .map_err(|err| SendError::Unexpected(format!("cannot encode batch: {}", err)))?;

    let response = transport.post_json(endpoint, &body)?;
    if policy.accepts(response.status) {
        Ok(payload.len())
    } else {
        Err(SendError::HttpStatus { status: response.status, body: response.body })
    }
}

/// Loads the sample file of every configured user and sends it.
///
/// Users are handled one after another. A missing file or a connection failure only affects the
/// current user. When `params.restamp` is set the samples are re-stamped relative to `now`.
pub fn send_users(transport: &dyn Transport, params: &SenderParameters, mode: SendMode, now: DateTime<Utc>) -> Vec<UserReport>
{
    let mut reports = Vec::with_capacity(params.users.len());

    for username in &params.users {
        let path = storage::user_file_path(&params.data_dir, username);
        let mut samples = match storage::read_samples(&path) {
            Ok(samples) => samples,
            Err(err) => {
                log::error!(target: "hrseed::send", "Skipping \'{}\': \'{}\'", username, err);
                reports.push(UserReport { username: username.clone(), outcome: UserOutcome::Skipped(SendError::from(err)) });
                continue;
            }
        };

        if params.restamp {
            if let Err(err) = restamp(&mut samples, now) {
                log::error!(target: "hrseed::send", "Skipping \'{}\', cannot re-stamp: \'{}\'", username, err);
                reports.push(UserReport { username: username.clone(), outcome: UserOutcome::Skipped(SendError::Unexpected(err.to_string())) });
                continue;
            }
        }

        log::info!(target: "hrseed::send", "Sending {} heart rate entries for \'{}\' to \'{}\'", samples.len(), username, params.endpoint);

        let outcome = match mode {
            SendMode::PerRecord => {
                let report = send_records(transport, &params.endpoint, &samples, &params.record_policy, Duration::from_millis(params.pause_millis));
                log::info!(target: "hrseed::send", "Finished sending data for \'{}\'. Successful: {}, Failed: {}", username, report.success, report.failure);
                UserOutcome::Records(report)
            }
            SendMode::Batch => {
                let verdict = send_batch(transport, &params.endpoint, username, &samples, &params.batch_policy);
                match &verdict {
                    Ok(count) => log::info!(target: "hrseed::send", "Batch of {} entries for \'{}\' accepted", count, username),
                    Err(err) => log::error!(target: "hrseed::send", "Batch for \'{}\' failed: \'{}\'", username, err),
                }
                UserOutcome::Batch(verdict)
            }
        };

        reports.push(UserReport { username: username.clone(), outcome });
    }

    reports
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::cell::RefCell;
    use chrono::TimeZone;
    use serde_json::Value;

    use crate::storage::{write_samples, FileLayout};
    use crate::transport::Response;

    /// Transport answering from a script of results and recording every request body.
    pub struct ScriptedTransport
    {
        script: RefCell<Vec<Result<u16, SendError>>>,
        default_status: u16,
        pub requests: RefCell<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        pub fn answering(default_status: u16) -> ScriptedTransport {
            ScriptedTransport {
                script: RefCell::new(Vec::new()),
                default_status,
                requests: RefCell::new(Vec::new()),
            }
        }

        /// Answers the `n`-th request (1 based) with `result`.
        pub fn with_answer(self, n: usize, result: Result<u16, SendError>) -> ScriptedTransport {
            {
                let mut script = self.script.borrow_mut();
                while script.len() < n {
                    script.push(Ok(self.default_status));
                }
                script[n - 1] = result;
            }
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    pub fn connection_refused() -> SendError {
        SendError::ConnectionFailure { endpoint: "http://test".to_string(), reason: "connection refused".to_string() }
    }

    impl Transport for ScriptedTransport {
        fn post_json(&self, endpoint: &str, body: &Value) -> Result<Response, SendError> {
            let index = self.requests.borrow().len();
            self.requests.borrow_mut().push((endpoint.to_string(), body.clone()));

            let mut script = self.script.borrow_mut();
            let answer = if index < script.len() {
                std::mem::replace(&mut script[index], Ok(self.default_status))
            } else {
                Ok(self.default_status)
            };
            answer.map(|status| Response { status, body: String::from("{}") })
        }
    }

    fn samples(username: &str, count: u32) -> Vec<Sample> {
        (0..count)
            .map(|index| Sample {
                username: username.to_string(),
                bpm: 100 + index,
                timestamp: format!("2025-12-01T10:{:02}:00", index),
            })
            .collect()
    }

    #[test]
    fn success_policies() {
        assert!(SuccessPolicy::AnySuccess.accepts(200));
        assert!(SuccessPolicy::AnySuccess.accepts(204));
        assert!(!SuccessPolicy::AnySuccess.accepts(300));
        assert!(!SuccessPolicy::AnySuccess.accepts(199));

        let batch = default_batch_policy();
        assert!(batch.accepts(200));
        assert!(batch.accepts(201));
        assert!(!batch.accepts(202));
    }

    #[test]
    fn every_record_is_its_own_request() {
        let transport = ScriptedTransport::answering(200);
        let data = samples("user_a", 4);

        let report = send_records(&transport, "http://test", &data, &SuccessPolicy::AnySuccess, Duration::from_millis(0));
        assert_eq!(report, RecordReport { attempts: 4, success: 4, failure: 0, abort_reason: None });

        let requests = transport.requests.borrow();
        assert_eq!(requests.len(), 4);
        for (request, sample) in requests.iter().zip(data.iter()) {
            assert_eq!(request.0, "http://test");
            assert_eq!(request.1, serde_json::to_value(sample).unwrap());
        }
    }

    #[test]
    fn connection_failure_stops_the_user() {
        let transport = ScriptedTransport::answering(200).with_answer(3, Err(connection_refused()));
        let data = samples("user_a", 10);

        let report = send_records(&transport, "http://test", &data, &SuccessPolicy::AnySuccess, Duration::from_millis(0));
        assert_eq!(report.attempts, 3);
        assert_eq!(report.success, 2);
        assert_eq!(report.failure, 1);
        assert!(report.is_aborted());
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn status_errors_are_counted_and_skipped() {
        let transport = ScriptedTransport::answering(201)
            .with_answer(2, Ok(500))
            .with_answer(4, Err(SendError::Unexpected("reset".to_string())));
        let data = samples("user_a", 5);

        let report = send_records(&transport, "http://test", &data, &SuccessPolicy::AnySuccess, Duration::from_millis(0));
        assert_eq!(report, RecordReport { attempts: 5, success: 3, failure: 2, abort_reason: None });
    }

    #[test]
    fn batch_is_a_single_columnar_request() {
        let transport = ScriptedTransport::answering(201);
        let data = samples("user_b", 3);

        let verdict = send_batch(&transport, "http://test", "user_b", &data, &default_batch_policy());
        assert_eq!(verdict.unwrap(), 3);

        let requests = transport.requests.borrow();
        assert_eq!(requests.len(), 1);
        let body = &requests[0].1;
        assert_eq!(body["username"], "user_b");
        assert_eq!(body["bpm"], "100\n101\n102");
        assert_eq!(body["timestamp"], "2025-12-01T10:00:00\n2025-12-01T10:01:00\n2025-12-01T10:02:00");
    }

    #[test]
    fn batch_rejects_statuses_outside_policy() {
        let transport = ScriptedTransport::answering(202);
        let verdict = send_batch(&transport, "http://test", "user_b", &samples("user_b", 2), &default_batch_policy());
        assert!(matches!(verdict, Err(SendError::HttpStatus { status: 202, .. })));

        let lenient = send_batch(&transport, "http://test", "user_b", &samples("user_b", 2), &SuccessPolicy::AnySuccess);
        assert!(lenient.is_ok());
    }

    #[test]
    fn misaligned_batch_is_not_posted() {
        let transport = ScriptedTransport::answering(200);
        let mut data = samples("user_b", 3);
        data[1].timestamp = "2025-12-01T10:01:00\n2025-12-01T10:01:30".to_string();

        let verdict = send_batch(&transport, "http://test", "user_b", &data, &SuccessPolicy::AnySuccess);
        match verdict {
            Err(SendError::Unexpected(message)) => assert!(message.contains("misaligned"), "{}", message),
            other => panic!("unexpected verdict: {:?}", other),
        }
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn empty_batch_is_still_posted() {
        let transport = ScriptedTransport::answering(200);
        assert_eq!(send_batch(&transport, "http://test", "user_c", &[], &SuccessPolicy::AnySuccess).unwrap(), 0);

        let requests = transport.requests.borrow();
        assert_eq!(requests[0].1["bpm"], "");
        assert_eq!(requests[0].1["timestamp"], "");
    }

    #[test]
    fn summaries_name_the_user_and_the_outcome() {
        let skipped = UserReport { username: "user_b".to_string(), outcome: UserOutcome::Skipped(SendError::FileNotFound(PathBuf::from("user_b_heart_rate_data.json"))) };
        assert_eq!(skipped.summary(), "user_b: skipped, input file user_b_heart_rate_data.json not found");

        let aborted = UserReport {
            username: "user_a".to_string(),
            outcome: UserOutcome::Records(RecordReport { attempts: 3, success: 2, failure: 1, abort_reason: Some("connection refused".to_string()) }),
        };
        assert_eq!(aborted.summary(), "user_a: 2 sent, 1 failed, aborted after 3 requests (connection refused)");

        let batch = UserReport { username: "user_c".to_string(), outcome: UserOutcome::Batch(Ok(5)) };
        assert_eq!(batch.summary(), "user_c: batch of 5 accepted");
        assert!(batch.is_success());
    }

    #[test]
    fn unrepresentable_restamp_skips_the_user() {
        let directory = tempfile::tempdir().unwrap();
        write_samples(&storage::user_file_path(directory.path(), "user_a"), &samples("user_a", 2), FileLayout::Array).unwrap();

        let params = SenderParameters {
            users: vec!["user_a".to_string()],
            data_dir: directory.path().to_path_buf(),
            restamp: true,
            ..SenderParameters::default()
        };
        let transport = ScriptedTransport::answering(200);
        let earliest = Utc.from_utc_datetime(&chrono::NaiveDateTime::MIN);

        let reports = send_users(&transport, &params, SendMode::Batch, earliest);
        assert!(matches!(reports[0].outcome, UserOutcome::Skipped(SendError::Unexpected(_))));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn users_are_sent_from_their_files() {
        let directory = tempfile::tempdir().unwrap();
        write_samples(&storage::user_file_path(directory.path(), "user_a"), &samples("user_a", 3), FileLayout::Array).unwrap();
        write_samples(&storage::user_file_path(directory.path(), "user_c"), &samples("user_c", 2), FileLayout::Container).unwrap();

        let params = SenderParameters {
            data_dir: directory.path().to_path_buf(),
            ..SenderParameters::default()
        };
        let transport = ScriptedTransport::answering(200).with_answer(2, Err(connection_refused()));

        let reports = send_users(&transport, &params, SendMode::PerRecord, Utc::now());
        assert_eq!(reports.len(), 3);

        match &reports[0].outcome {
            UserOutcome::Records(report) => {
                assert_eq!(report.attempts, 2);
                assert!(report.is_aborted());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(reports[1].outcome, UserOutcome::Skipped(SendError::FileNotFound(_))));
        match &reports[2].outcome {
            UserOutcome::Records(report) => assert_eq!(report.success, 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(reports[2].is_success());
        assert_eq!(transport.request_count(), 4);
    }

    #[test]
    fn batch_mode_reports_one_verdict_per_user() {
        let directory = tempfile::tempdir().unwrap();
        for username in &["user_a", "user_b", "user_c"] {
            write_samples(&storage::user_file_path(directory.path(), username), &samples(username, 5), FileLayout::Array).unwrap();
        }

        let params = SenderParameters {
            data_dir: directory.path().to_path_buf(),
            restamp: true,
            ..SenderParameters::default()
        };
        let transport = ScriptedTransport::answering(200).with_answer(2, Err(connection_refused()));

        let reports = send_users(&transport, &params, SendMode::Batch, Utc::now());
        let verdicts: Vec<bool> = reports.iter().map(|report| report.is_success()).collect();
        assert_eq!(verdicts, vec![true, false, true]);
        assert_eq!(transport.request_count(), 3);

        let requests = transport.requests.borrow();
        let timestamps = requests[0].1["timestamp"].as_str().unwrap().to_string();
        assert_eq!(timestamps.split('\n').count(), 5);
        assert!(timestamps.split('\n').all(|line| line.ends_with('Z')));
    }
}
