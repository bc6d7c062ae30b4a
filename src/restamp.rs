//! Rewrites the timestamps of stored samples so they look recent at send time.
use chrono::{DateTime, Utc};

use crate::generator::{advance, GeneratorError, TIMESTAMP_FORMAT_UTC};
use crate::record::Sample;

/// Re-stamps `samples` in place relative to `now`.
///
/// The first sample is placed `len + 1` minutes before `now` and every following sample one minute
/// after its predecessor. Order, bpm and username are left untouched.
///
/// # Errors
///
/// * `GeneratorError::TimeOutOfRange` - The window would start before the earliest representable
///     time. The samples are left unchanged.
///
pub fn restamp(samples: &mut [Sample], now: DateTime<Utc>) -> Result<(), GeneratorError>
{
    let mut current_time = advance(now, -(samples.len() as i64 + 1))?;
    for sample in samples.iter_mut() {
        sample.timestamp = current_time.format(TIMESTAMP_FORMAT_UTC).to_string();
        current_time = advance(current_time, 1)?;
    }
    log::debug!(target: "hrseed::restamp", "Re-stamped {} samples ending before \'{}\'", samples.len(), now);
    Ok(())
}
