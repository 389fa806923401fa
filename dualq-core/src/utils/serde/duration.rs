//! serde for durations written as human readable spans ("15ms", "1s 500ms")
use std::fmt;
use std::time::Duration;

use serde::{de, ser, Deserializer, Serializer};

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct V;

    impl de::Visitor<'_> for V {
        type Value = Duration;

        fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
            fmt.write_str("a duration such as \"15ms\" or a number of seconds")
        }

        fn visit_str<E>(self, v: &str) -> Result<Duration, E>
        where
            E: de::Error,
        {
            let span: jiff::Span = v.parse().map_err(E::custom)?;
            Duration::try_from(span).map_err(E::custom)
        }

        fn visit_f64<E>(self, v: f64) -> Result<Duration, E>
        where
            E: de::Error,
        {
            Duration::try_from_secs_f64(v).map_err(E::custom)
        }

        fn visit_u64<E>(self, v: u64) -> Result<Duration, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Duration, E>
        where
            E: de::Error,
        {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("negative duration"))
        }
    }

    deserializer.deserialize_any(V)
}

pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let span = jiff::Span::try_from(*value).map_err(ser::Error::custom)?;
    serializer.serialize_str(&format!("{:#}", span))
}
