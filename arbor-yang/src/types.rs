//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use regex::Regex;

use crate::error::Error;

/// The YANG built-in types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BaseType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Decimal64,
    String,
    Boolean,
    Enumeration,
    Bits,
    Binary,
    Empty,
    Leafref,
    Identityref,
    InstanceIdentifier,
    Union,
}

/// A fully resolved type: the built-in type at the end of the typedef chain
/// plus the union of the facets collected along it.
#[derive(Clone, Debug, Default)]
pub struct TypeSpec {
    pub base: Option<BaseType>,
    // Inclusive integer ranges (all integer widths fit in i128).
    pub ranges: Vec<(i128, i128)>,
    // Inclusive decimal64 ranges.
    pub dec_ranges: Vec<(f64, f64)>,
    // Inclusive string/binary length ranges.
    pub lengths: Vec<(u64, u64)>,
    // Anchored patterns; every one must match.
    pub patterns: Vec<Regex>,
    pub enums: Vec<String>,
    pub bits: Vec<String>,
    pub fraction_digits: Option<u8>,
    // Leafref path expression, verbatim from the defining statement.
    pub leafref_path: Option<String>,
    // Identityref base, resolved to (namespace, name).
    pub identity_base: Option<(String, String)>,
    // Union members, in declaration order.
    pub members: Vec<TypeSpec>,
}

// ===== impl BaseType =====

impl BaseType {
    pub fn from_name(name: &str) -> Option<BaseType> {
        let base = match name {
            "int8" => BaseType::Int8,
            "int16" => BaseType::Int16,
            "int32" => BaseType::Int32,
            "int64" => BaseType::Int64,
            "uint8" => BaseType::Uint8,
            "uint16" => BaseType::Uint16,
            "uint32" => BaseType::Uint32,
            "uint64" => BaseType::Uint64,
            "decimal64" => BaseType::Decimal64,
            "string" => BaseType::String,
            "boolean" => BaseType::Boolean,
            "enumeration" => BaseType::Enumeration,
            "bits" => BaseType::Bits,
            "binary" => BaseType::Binary,
            "empty" => BaseType::Empty,
            "leafref" => BaseType::Leafref,
            "identityref" => BaseType::Identityref,
            "instance-identifier" => BaseType::InstanceIdentifier,
            "union" => BaseType::Union,
            _ => return None,
        };
        Some(base)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            BaseType::Int8
                | BaseType::Int16
                | BaseType::Int32
                | BaseType::Int64
                | BaseType::Uint8
                | BaseType::Uint16
                | BaseType::Uint32
                | BaseType::Uint64
        )
    }

    /// Implicit bounds of an integer type.
    pub fn bounds(&self) -> (i128, i128) {
        match self {
            BaseType::Int8 => (i8::MIN as i128, i8::MAX as i128),
            BaseType::Int16 => (i16::MIN as i128, i16::MAX as i128),
            BaseType::Int32 => (i32::MIN as i128, i32::MAX as i128),
            BaseType::Int64 => (i64::MIN as i128, i64::MAX as i128),
            BaseType::Uint8 => (0, u8::MAX as i128),
            BaseType::Uint16 => (0, u16::MAX as i128),
            BaseType::Uint32 => (0, u32::MAX as i128),
            BaseType::Uint64 => (0, u64::MAX as i128),
            _ => (i128::MIN, i128::MAX),
        }
    }
}

// ===== impl TypeSpec =====

impl TypeSpec {
    /// Checks a value against the scalar facets of this type. Leafref,
    /// identityref and instance-identifier always pass here; their
    /// referential constraints need a data tree and are the validator's
    /// business. Union passes if any member passes.
    pub fn check_scalar(&self, value: &str) -> Result<(), String> {
        let Some(base) = self.base else {
            return Ok(());
        };
        match base {
            BaseType::Int8
            | BaseType::Int16
            | BaseType::Int32
            | BaseType::Int64
            | BaseType::Uint8
            | BaseType::Uint16
            | BaseType::Uint32
            | BaseType::Uint64 => self.check_integer(base, value),
            BaseType::Decimal64 => self.check_decimal64(value),
            BaseType::String => self.check_string(value),
            BaseType::Boolean => match value {
                "true" | "false" => Ok(()),
                _ => Err(format!("\"{value}\" is not a boolean")),
            },
            BaseType::Enumeration => {
                if self.enums.iter().any(|label| label == value) {
                    Ok(())
                } else {
                    Err(format!("\"{value}\" is not an enumeration choice"))
                }
            }
            BaseType::Bits => {
                for bit in value.split_whitespace() {
                    if !self.bits.iter().any(|label| label == bit) {
                        return Err(format!("unknown bit label \"{bit}\""));
                    }
                }
                Ok(())
            }
            BaseType::Binary => Ok(()),
            BaseType::Empty => {
                if value.is_empty() {
                    Ok(())
                } else {
                    Err("empty leaf must carry no value".to_owned())
                }
            }
            BaseType::Union => {
                if self
                    .members
                    .iter()
                    .any(|member| member.check_scalar(value).is_ok())
                {
                    Ok(())
                } else {
                    Err(format!("\"{value}\" matches no member of the union"))
                }
            }
            BaseType::Leafref
            | BaseType::Identityref
            | BaseType::InstanceIdentifier => Ok(()),
        }
    }

    fn check_integer(&self, base: BaseType, value: &str) -> Result<(), String> {
        let parsed = parse_integer(value)
            .ok_or_else(|| format!("\"{value}\" is not an integer"))?;
        let (min, max) = base.bounds();
        if parsed < min || parsed > max {
            return Err(format!("{value} is out of the {base:?} value space"));
        }
        if !self.ranges.is_empty()
            && !self.ranges.iter().any(|(lo, hi)| parsed >= *lo && parsed <= *hi)
        {
            return Err(format!("{value} is out of range"));
        }
        Ok(())
    }

    fn check_decimal64(&self, value: &str) -> Result<(), String> {
        let parsed = value
            .parse::<f64>()
            .map_err(|_| format!("\"{value}\" is not a decimal64"))?;
        if let Some(digits) = self.fraction_digits {
            let fraction = value
                .split_once('.')
                .map(|(_, frac)| frac.len())
                .unwrap_or(0);
            if fraction > digits as usize {
                return Err(format!(
                    "\"{value}\" exceeds {digits} fraction digits"
                ));
            }
        }
        if !self.dec_ranges.is_empty()
            && !self
                .dec_ranges
                .iter()
                .any(|(lo, hi)| parsed >= *lo && parsed <= *hi)
        {
            return Err(format!("{value} is out of range"));
        }
        Ok(())
    }

    fn check_string(&self, value: &str) -> Result<(), String> {
        let length = value.chars().count() as u64;
        if !self.lengths.is_empty()
            && !self
                .lengths
                .iter()
                .any(|(lo, hi)| length >= *lo && length <= *hi)
        {
            return Err(format!("length {length} is out of range"));
        }
        for pattern in &self.patterns {
            if !pattern.is_match(value) {
                return Err(format!(
                    "\"{value}\" does not match pattern \"{}\"",
                    pattern.as_str()
                ));
            }
        }
        Ok(())
    }
}

// ===== global functions =====

pub(crate) fn parse_integer(value: &str) -> Option<i128> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        return i128::from_str_radix(hex, 16).ok();
    }
    value.parse().ok()
}

/// Parses a `range` argument ("1..100 | 200 | 300..max") against the bounds
/// of the base type.
pub(crate) fn parse_range_arg(
    arg: &str,
    bounds: (i128, i128),
) -> Result<Vec<(i128, i128)>, Error> {
    let mut out = Vec::new();
    for part in arg.split('|') {
        let part = part.trim();
        let (lo, hi) = match part.split_once("..") {
            Some((lo, hi)) => (lo.trim(), hi.trim()),
            None => (part, part),
        };
        let lo = parse_bound(lo, bounds)?;
        let hi = parse_bound(hi, bounds)?;
        out.push((lo, hi));
    }
    Ok(out)
}

fn parse_bound(token: &str, bounds: (i128, i128)) -> Result<i128, Error> {
    match token {
        "min" => Ok(bounds.0),
        "max" => Ok(bounds.1),
        _ => parse_integer(token).ok_or_else(|| {
            Error::SchemaType(
                token.to_owned(),
                "bad range boundary".to_owned(),
            )
        }),
    }
}

/// Parses a decimal64 `range` argument.
pub(crate) fn parse_dec_range_arg(arg: &str) -> Result<Vec<(f64, f64)>, Error> {
    let mut out = Vec::new();
    for part in arg.split('|') {
        let part = part.trim();
        let (lo, hi) = match part.split_once("..") {
            Some((lo, hi)) => (lo.trim(), hi.trim()),
            None => (part, part),
        };
        let parse = |token: &str, fallback: f64| -> Result<f64, Error> {
            match token {
                "min" => Ok(f64::MIN),
                "max" => Ok(f64::MAX),
                _ => token.parse().map_err(|_| {
                    Error::SchemaType(
                        token.to_owned(),
                        "bad range boundary".to_owned(),
                    )
                }),
            }
            .map(|value: f64| if value.is_nan() { fallback } else { value })
        };
        out.push((parse(lo, f64::MIN)?, parse(hi, f64::MAX)?));
    }
    Ok(out)
}

/// Parses a `length` argument.
pub(crate) fn parse_length_arg(arg: &str) -> Result<Vec<(u64, u64)>, Error> {
    let mut out = Vec::new();
    for part in arg.split('|') {
        let part = part.trim();
        let (lo, hi) = match part.split_once("..") {
            Some((lo, hi)) => (lo.trim(), hi.trim()),
            None => (part, part),
        };
        let parse = |token: &str| -> Result<u64, Error> {
            match token {
                "min" => Ok(0),
                "max" => Ok(u64::MAX),
                _ => token.parse().map_err(|_| {
                    Error::SchemaType(
                        token.to_owned(),
                        "bad length boundary".to_owned(),
                    )
                }),
            }
        };
        out.push((parse(lo)?, parse(hi)?));
    }
    Ok(out)
}

/// Translates an XSD regular expression to the host regex dialect. XSD
/// patterns are implicitly anchored; the character classes used by the
/// common IETF modules pass through unchanged.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, Error> {
    let translated = format!("^(?:{pattern})$");
    Regex::new(&translated).map_err(|error| {
        Error::SchemaType(pattern.to_owned(), error.to_string())
    })
}
