//! Serde helpers for on-chain integers.
//!
//! Payload integers arrive either as JSON integers or as decimal strings.
//! Floats are rejected rather than coerced so no value ever loses precision.
//!
//! `serde_json` is built with `arbitrary_precision`, so JSON integers wider
//! than 64 bits keep their digits: a `Value` hands them over as `u128` or
//! `i128`, a streaming parse as a single-entry map holding the number text.

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Unexpected, Visitor};

/// Map key under which `arbitrary_precision` passes a raw number.
const NUMBER_TOKEN: &str = "$serde_json::private::Number";

/// Parses an optionally negative run of ASCII digits.
fn parse_integer(v: &str) -> Option<i128> {
    let digits = v.strip_prefix('-').unwrap_or(v);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    v.parse().ok()
}

struct IntVisitor;

impl<'de> Visitor<'de> for IntVisitor {
    type Value = i128;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a decimal integer string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i128, E> {
        Ok(i128::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i128, E> {
        Ok(i128::from(v))
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<i128, E> {
        Ok(v)
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<i128, E> {
        i128::try_from(v).map_err(|_| E::custom(format!("integer {v} out of range")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i128, E> {
        parse_integer(v).ok_or_else(|| E::invalid_value(Unexpected::Str(v), &self))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<i128, A::Error> {
        let key: Option<String> = map.next_key()?;
        if key.as_deref() != Some(NUMBER_TOKEN) {
            return Err(de::Error::invalid_type(Unexpected::Map, &self));
        }
        let number: String = map.next_value()?;
        parse_integer(&number).ok_or_else(|| {
            de::Error::custom(format!("number {number} is not an integer in range"))
        })
    }
}

/// Deserializes any integer type from a JSON integer or decimal string.
///
/// # Errors
///
/// Fails on floats, non-numeric strings, and values outside `T`'s range.
pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i128>,
{
    let value = deserializer.deserialize_any(IntVisitor)?;
    T::try_from(value).map_err(|_| de::Error::custom(format!("integer {value} out of range")))
}

/// `i128` amounts, serialized as decimal strings.
pub mod amount {
    use serde::{Deserializer, Serializer};

    /// Serializes the amount as a decimal string.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    /// Deserializes an amount from an integer or decimal string.
    ///
    /// # Errors
    ///
    /// See [`super::deserialize`].
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        super::deserialize(deserializer)
    }
}

/// Optional `i128` amounts, serialized as decimal strings or null.
pub mod amount_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes the amount as a decimal string, or null.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Option<i128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => super::amount::serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes an optional amount.
    ///
    /// # Errors
    ///
    /// See [`super::deserialize`].
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i128>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapped(#[serde(with = "super::amount")] i128);

        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(v)| v))
    }
}
