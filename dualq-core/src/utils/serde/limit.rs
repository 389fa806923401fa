//! serde for optional queue limits, written as a number or "unlimited"
use std::fmt;

use serde::{de, Deserializer, Serializer};

const UNLIMITED: &str = "unlimited";

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    struct V;

    impl<'de> de::Visitor<'de> for V {
        type Value = Option<usize>;

        fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
            fmt.write_str("a positive number or \"unlimited\"")
        }

        fn visit_str<E>(self, v: &str) -> Result<Option<usize>, E>
        where
            E: de::Error,
        {
            if v.eq_ignore_ascii_case(UNLIMITED) {
                Ok(None)
            } else {
                v.parse().map(Some).map_err(E::custom)
            }
        }

        fn visit_u64<E>(self, v: u64) -> Result<Option<usize>, E>
        where
            E: de::Error,
        {
            usize::try_from(v).map(Some).map_err(E::custom)
        }

        fn visit_i64<E>(self, v: i64) -> Result<Option<usize>, E>
        where
            E: de::Error,
        {
            usize::try_from(v)
                .map(Some)
                .map_err(|_| E::custom("negative limit"))
        }

        fn visit_none<E>(self) -> Result<Option<usize>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Option<usize>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Option<usize>, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }
    }

    deserializer.deserialize_any(V)
}

pub fn serialize<S>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(limit) => serializer.serialize_u64(*limit as u64),
        None => serializer.serialize_str(UNLIMITED),
    }
}
