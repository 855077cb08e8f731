use crate::error::KrbError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, the unit of every timestamp on the wire.
pub fn unix_millis(time: SystemTime) -> Result<i64, KrbError> {
    time.duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .map_err(|_| KrbError::DoYouHaveATimeMachine)
}

pub fn now_millis() -> Result<i64, KrbError> {
    unix_millis(SystemTime::now())
}

pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis() {
        let t = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(unix_millis(t), Ok(1_700_000_000_123));
        assert_eq!(
            unix_millis(UNIX_EPOCH - Duration::from_secs(1)),
            Err(KrbError::DoYouHaveATimeMachine)
        );
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_secs(60)), 60_000);
        assert_eq!(duration_millis(Duration::MAX), i64::MAX);
    }
}
