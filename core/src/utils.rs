use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Converts a ``SystemTime`` to a ``DateTime<Utc>``, it is a private method used internally
/// by `schedkeeper` as the rest of the crate speaks [`SystemTime`] (for clock abstraction
/// purposes) while the wire format and user-facing API speak [`DateTime<Utc>`]
pub(crate) fn system_time_to_date_time(t: SystemTime) -> DateTime<Utc> {
    let (sec, nsec) = match t.duration_since(UNIX_EPOCH) {
        Ok(dur) => (dur.as_secs() as i64, dur.subsec_nanos()),
        Err(e) => {
            let dur = e.duration();
            let (sec, nsec) = (dur.as_secs() as i64, dur.subsec_nanos());
            if nsec == 0 {
                (-sec, 0)
            } else {
                (-sec - 1, 1_000_000_000 - nsec)
            }
        }
    };
    DateTime::from_timestamp(sec, nsec).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Converts a ``DateTime<Utc>`` to a ``SystemTime``, the inverse of
/// [`system_time_to_date_time`]
pub(crate) fn date_time_to_system_time(dt: DateTime<Utc>) -> SystemTime {
    let duration_since_epoch = dt.timestamp_nanos_opt().unwrap_or(0);
    if duration_since_epoch >= 0 {
        UNIX_EPOCH + Duration::from_nanos(duration_since_epoch as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos((-duration_since_epoch) as u64)
    }
}
