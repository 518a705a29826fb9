use chrono::{DateTime, TimeZone, Utc};

/// Current time truncated to the millisecond precision documents store.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_millis() {
        let now = now_millis();
        assert_eq!(from_millis(now.timestamp_millis()), now);
        assert_eq!(from_millis(0).timestamp(), 0);
    }
}
