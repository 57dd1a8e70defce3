use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Serializes Duration as whole nanoseconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    nanos.serialize(serializer)
}

/// Deserializes Duration from whole nanoseconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let nanos = u64::deserialize(deserializer)?;
    Ok(Duration::from_nanos(nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[derive(Serialize, Deserialize)]
    struct Test {
        #[serde(serialize_with = "serialize_duration")]
        #[serde(deserialize_with = "deserialize_duration")]
        window: Duration,
    }

    #[test]
    fn test_duration_is_written_in_nanoseconds() {
        let original = Test {
            window: Duration::from_micros(100),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(serialized, r#"{"window":100000}"#);

        let deserialized: Test = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.window, original.window);
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let parsed: std::result::Result<Test, _> = serde_json::from_str(r#"{"window":-5}"#);
        assert!(parsed.is_err());
    }
}
