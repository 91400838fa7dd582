// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Lenient deserializers for the fields of a `BaseModel`.
//!
//! Records written by other clients of the same store may carry timestamps as RFC 3339 strings
//! or as milliseconds since the epoch, and versions as numbers or numeric strings.  These helpers
//! accept all of those and normalize them, while always serializing to a single canonical form:
//! RFC 3339 strings for timestamps and plain integers for versions.

use crate::model::{ModelError, ModelResult};
use serde::de::{self, Visitor};
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Parses an RFC 3339 timestamp.
pub fn parse_timestamp(s: &str) -> ModelResult<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| ModelError(format!("Invalid timestamp '{}': {}", s, e)))
}

/// Converts milliseconds since the epoch to a timestamp.
pub fn timestamp_from_millis(ms: i64) -> ModelResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|e| ModelError(format!("Invalid timestamp {}ms: {}", ms, e)))
}

/// Formats a timestamp in its canonical RFC 3339 form.
pub fn format_timestamp(t: &OffsetDateTime) -> ModelResult<String> {
    t.format(&Rfc3339).map_err(|e| ModelError(format!("Cannot format timestamp: {}", e)))
}

/// Visitor for a timestamp given as a string or as epoch milliseconds.
struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = OffsetDateTime;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an RFC 3339 timestamp or milliseconds since the epoch")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        parse_timestamp(v).map_err(|e| E::custom(e.to_string()))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        timestamp_from_millis(v).map_err(|e| E::custom(e.to_string()))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let v = i64::try_from(v).map_err(|e| E::custom(format!("Invalid timestamp: {}", e)))?;
        self.visit_i64(v)
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if !v.is_finite() || v.fract() != 0.0 {
            return Err(E::custom(format!("Invalid timestamp: {} is not a whole number", v)));
        }
        self.visit_i64(v as i64)
    }
}

/// Visitor for a version given as a number or as a numeric string.
struct VersionVisitor;

impl<'de> Visitor<'de> for VersionVisitor {
    type Value = u64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a non-negative integer version")
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(v)
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u64::try_from(v).map_err(|_| E::custom(format!("Invalid version: {} is negative", v)))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if !v.is_finite() || v.fract() != 0.0 || v < 0.0 {
            return Err(E::custom(format!("Invalid version: {}", v)));
        }
        Ok(v as u64)
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.trim().parse::<u64>().map_err(|e| E::custom(format!("Invalid version '{}': {}", v, e)))
    }
}

/// Generates a `serde(with)` module for an optional value handled by `$visitor`.
macro_rules! optional_with_visitor {
    ( $name:ident, $t:ty, $visitor:ident, $serialize:path ) => {
        /// `serde(with)` adapter for optional values of this kind.
        pub mod $name {
            use super::*;
            use serde::{Deserializer, Serializer};

            /// Serializes an optional value in its canonical form.
            pub fn serialize<S>(value: &Option<$t>, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                match value {
                    Some(v) => $serialize(v, serializer),
                    None => serializer.serialize_none(),
                }
            }

            /// Visitor that handles the presence or absence of the value.
            struct OptionVisitor;

            impl<'de> Visitor<'de> for OptionVisitor {
                type Value = Option<$t>;

                fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                    $visitor.expecting(formatter)
                }

                fn visit_none<E>(self) -> Result<Self::Value, E>
                where
                    E: de::Error,
                {
                    Ok(None)
                }

                fn visit_unit<E>(self) -> Result<Self::Value, E>
                where
                    E: de::Error,
                {
                    Ok(None)
                }

                fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
                where
                    D: Deserializer<'de>,
                {
                    deserializer.deserialize_any($visitor).map(Some)
                }
            }

            /// Deserializes an optional value in any of its accepted forms.
            pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<$t>, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserializer.deserialize_option(OptionVisitor)
            }
        }
    };
}

/// Serializes a timestamp as an RFC 3339 string.
fn serialize_timestamp<S>(v: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let s = format_timestamp(v).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&s)
}

/// Serializes a version as a plain integer.
fn serialize_version<S>(v: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(*v)
}

optional_with_visitor!(opt_timestamp, OffsetDateTime, TimestampVisitor, serialize_timestamp);
optional_with_visitor!(opt_version, u64, VersionVisitor, serialize_version);
