// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Request Validation
 * Structural JSON limits and string sanitization for the API edge
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use serde_json::Value;

use crate::errors::{ScannerError, ScannerResult};

/// JSON documents over this size are rejected before parsing.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Maximum object/array nesting depth.
pub const MAX_NESTING_DEPTH: usize = 10;

/// Maximum length of any string value.
pub const MAX_STRING_LENGTH: usize = 1000;

/// Remove ASCII control characters (except tab) from a string.
pub fn sanitize_string(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect()
}

fn check_value(value: &Value, depth: usize) -> ScannerResult<()> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ScannerError::Validation(format!(
            "JSON nesting depth exceeds {}",
            MAX_NESTING_DEPTH
        )));
    }

    match value {
        Value::String(s) => {
            if s.len() > MAX_STRING_LENGTH {
                return Err(ScannerError::Validation(format!(
                    "String value exceeds {} characters",
                    MAX_STRING_LENGTH
                )));
            }
        }
        Value::Array(items) => {
            for item in items {
                check_value(item, depth + 1)?;
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                if key.len() > MAX_STRING_LENGTH {
                    return Err(ScannerError::Validation(format!(
                        "Object key exceeds {} characters",
                        MAX_STRING_LENGTH
                    )));
                }
                check_value(item, depth + 1)?;
            }
        }
        _ => {}
    }

    Ok(())
}

/// Validate a parsed JSON body against the structural limits.
pub fn validate_json_body(value: &Value, raw_len: usize) -> ScannerResult<()> {
    if raw_len > MAX_BODY_BYTES {
        return Err(ScannerError::Validation(format!(
            "Request body exceeds {} bytes",
            MAX_BODY_BYTES
        )));
    }
    check_value(value, 0)
}

/// Recursively strip control characters from every string in a JSON value.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (sanitize_string(&k), sanitize_value(v)))
                .collect(),
        ),
        other => other,
    }
}
