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

//! Field validators shared by all services.
//!
//! Validators never fail early: every check appends human-readable messages to a list of errors
//! supplied by the caller so that all the problems of a record can be reported at once.

use crate::model::EmailAddress;
use crate::model::coerce::parse_timestamp;
use log::{debug, info};
use serde_json::Value;
use std::fmt;
use std::net::Ipv4Addr;

/// Number of bits available to the bitmask helpers.
const MAX_BIT_POSITION: u32 = u64::BITS;

/// Formats `value` for inclusion in an error message, without quotes around strings.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        value => value.to_string(),
    }
}

/// Formats `n` dropping the fractional part when it is zero.
fn display_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 { format!("{}", n as i64) } else { format!("{}", n) }
}

/// Records the validation failure `message` in `errors`.
fn fail(errors: &mut Vec<String>, message: String) {
    info!("{}", message);
    errors.push(message);
}

/// Stateless collection of field validators.
#[derive(Clone, Debug, Default)]
pub struct CommonValidator {}

impl CommonValidator {
    /// Creates a new validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `value` is one of the entries in `list`.
    pub fn in_list<T>(&self, value: &T, list: &[T], errors: &mut Vec<String>)
    where
        T: fmt::Display + PartialEq,
    {
        if !list.contains(value) {
            let list = list.iter().map(T::to_string).collect::<Vec<String>>().join(",");
            fail(errors, format!("value: {} is not in list of {}", value, list));
        }
    }

    /// Checks that the length of `value` is within `min` and `max` characters.
    ///
    /// Missing bounds are not checked.  A missing or empty value is only an error if `min` is
    /// positive.
    pub fn in_length(
        &self,
        value: Option<&str>,
        min: Option<usize>,
        max: Option<usize>,
        errors: &mut Vec<String>,
    ) {
        let min = min.unwrap_or(0);
        let max = max.unwrap_or(usize::MAX);
        debug!("validate {:?} between {} and {}", value, min, max);

        match value {
            Some(value) if !value.is_empty() => {
                let len = value.chars().count();
                if len < min {
                    fail(errors, format!("FIELD value: \"{}\" is less {} characters.", value, min));
                } else if len > max {
                    fail(
                        errors,
                        format!("FIELD value: \"{}\" is larger than {} characters.", value, max),
                    );
                }
            }
            _ if min > 0 => fail(
                errors,
                format!("FIELD value is empty but should be at least {} characters.", min),
            ),
            _ => (),
        }
    }

    /// Checks that `value` is a date: an RFC 3339 string or an integer of epoch milliseconds.
    pub fn is_date(&self, value: Option<&Value>, errors: &mut Vec<String>) {
        let valid = match value {
            None | Some(Value::Null) => {
                fail(errors, "FIELD is empty and not a valid date".to_owned());
                return;
            }
            Some(Value::String(s)) => parse_timestamp(s).is_ok(),
            Some(Value::Number(n)) => n.is_i64() || n.is_u64(),
            Some(_) => false,
        };
        if let (false, Some(value)) = (valid, value) {
            fail(errors, format!("FIELD value: {} is not a valid date", display(value)));
        }
    }

    /// Checks that `value` is a boolean.
    pub fn is_boolean(&self, value: Option<&Value>, errors: &mut Vec<String>) {
        match value {
            None | Some(Value::Null) => {
                fail(errors, "FIELD is empty and not a valid boolean".to_owned())
            }
            Some(Value::Bool(_)) => (),
            Some(value) => {
                fail(errors, format!("FIELD value: {} is not a valid boolean", display(value)))
            }
        }
    }

    /// Checks that `value` is a syntactically valid email address.
    pub fn is_email(&self, value: Option<&str>, errors: &mut Vec<String>) {
        match value {
            Some(value) if !value.is_empty() => {
                if EmailAddress::new(value).is_err() {
                    fail(errors, format!("FIELD value: \"{}\" is not a valid email", value));
                }
            }
            _ => fail(errors, "FIELD is empty and not a valid email".to_owned()),
        }
    }

    /// Checks that `ip` is an IPv4 address in dotted-quad notation.
    pub fn is_ip(&self, ip: Option<&str>, errors: &mut Vec<String>) {
        match ip {
            Some(ip) if !ip.is_empty() => {
                if ip.parse::<Ipv4Addr>().is_err() {
                    fail(errors, format!("FIELD is not a valid IP address format: {}", ip));
                }
            }
            _ => fail(
                errors,
                "FIELD value is null or is not a string and not a valid IP address".to_owned(),
            ),
        }
    }

    /// Checks that `value` is an absolute `http`, `https` or `ftp` URL with a host.
    pub fn is_url(&self, value: &str, errors: &mut Vec<String>) {
        let valid = match url::Url::parse(value) {
            Ok(url) => {
                matches!(url.scheme(), "http" | "https" | "ftp")
                    && url.host_str().is_some_and(|h| !h.is_empty())
            }
            Err(e) => {
                debug!("Cannot parse URL {}: {}", value, e);
                false
            }
        };
        if !valid {
            fail(errors, format!("FIELD is not a valid URL format: {}", value));
        }
    }

    /// Checks that `value` is a number within `min` and `max`, both inclusive.
    ///
    /// A missing value is reported as undefined and any other non-numeric value, including
    /// `null`, is reported as not being a number.
    pub fn is_number_between(
        &self,
        value: Option<&Value>,
        min: Option<f64>,
        max: Option<f64>,
        errors: &mut Vec<String>,
    ) {
        let value = match value {
            None => {
                fail(errors, "FIELD value is undefined".to_owned());
                return;
            }
            Some(value) => value,
        };
        let n = match value.as_f64() {
            Some(n) if !n.is_nan() => n,
            _ => {
                fail(errors, format!("FIELD value {} is not a number", display(value)));
                return;
            }
        };

        match (min, max) {
            (Some(min), _) if n < min => fail(
                errors,
                format!("FIELD value {} is less than minimum: {}", value, display_number(min)),
            ),
            (_, Some(max)) if n > max => fail(
                errors,
                format!("FIELD value {} is greater than maximum: {}", value, display_number(max)),
            ),
            _ => (),
        }
    }

    /// Returns true if the bit at 1-based `position` is set in `flags`.
    ///
    /// Positions outside of the 1 to 64 range are never set.
    pub fn is_bit_set(&self, flags: u64, position: u32) -> bool {
        if !(1..=MAX_BIT_POSITION).contains(&position) {
            debug!("Bit position {} is out of range", position);
            return false;
        }
        let bit = (flags >> (position - 1)) & 1;
        debug!("flags: {:#b}, bp: {}, bit: {}", flags, position - 1, bit);
        bit == 1
    }

    /// Returns `flags` with the bit at 1-based `position` set.
    ///
    /// Positions outside of the 1 to 64 range leave `flags` unchanged.
    pub fn set_bit_flag(&self, flags: u64, position: u32) -> u64 {
        if !(1..=MAX_BIT_POSITION).contains(&position) {
            debug!("Bit position {} is out of range", position);
            return flags;
        }
        let mask = 1u64 << (position - 1);
        debug!("bp: {} = {} = {:b}", position, mask, mask);
        flags | mask
    }
}
