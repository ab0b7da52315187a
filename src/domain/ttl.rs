//! Lease and certificate durations.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A duration in whole seconds.
///
/// Manifests may give a bare number of seconds or a string of `<number><unit>` groups
/// with units `s`, `m`, `h` and `d` (`"90s"`, `"72h"`, `"1h30m"`). Vault reports
/// durations both as integers and in that compound form (`"768h0m0s"`), so remote
/// values parse the same way. Serialized as seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ttl(u64);

impl Ttl {
    pub const fn from_secs(seconds: u64) -> Self {
        Self(seconds)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("duration cannot be empty".to_string());
        }
        if let Ok(seconds) = value.parse::<u64>() {
            return Ok(Self(seconds));
        }

        let mut total: u64 = 0;
        let mut digits = String::new();
        for c in value.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let scale = match c {
                's' => 1,
                'm' => 60,
                'h' => 3_600,
                'd' => 86_400,
                other => {
                    return Err(format!("invalid duration '{}': unknown unit '{}'", value, other))
                }
            };
            let amount: u64 = digits
                .parse()
                .map_err(|_| format!("invalid duration '{}': unit '{}' has no amount", value, c))?;
            total = amount
                .checked_mul(scale)
                .and_then(|seconds| total.checked_add(seconds))
                .ok_or_else(|| format!("invalid duration '{}': too large", value))?;
            digits.clear();
        }

        if !digits.is_empty() {
            return Err(format!(
                "invalid duration '{}': trailing '{}' has no unit",
                value, digits
            ));
        }
        Ok(Self(total))
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl Serialize for Ttl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

struct TtlVisitor;

impl Visitor<'_> for TtlVisitor {
    type Value = Ttl;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number of seconds or a duration such as \"72h\"")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Ttl, E> {
        Ok(Ttl(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Ttl, E> {
        u64::try_from(value).map(Ttl).map_err(|_| E::custom("duration cannot be negative"))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Ttl, E> {
        Ttl::parse(value).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Ttl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TtlVisitor)
    }
}
