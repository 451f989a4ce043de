// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Typed accessors over a tool call's JSON arguments.
//!
//! Every failure is an [`ArgError`] with a message fit for returning to the
//! model inside a failed tool result — argument problems never become
//! transport errors.

use serde_json::Value;

use crate::validate::{MAX_INPUT_LEN, MAX_PATH_LEN};

/// A readable argument-extraction error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgError(pub String);

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ArgError {}

fn err(msg: impl Into<String>) -> ArgError {
    ArgError(msg.into())
}

/// Borrowing view over a JSON arguments object.
#[derive(Debug, Clone, Copy)]
pub struct ToolArgs<'a> {
    args: &'a Value,
}

impl<'a> ToolArgs<'a> {
    /// Wrap raw arguments.  Anything but a JSON object (or null, treated as
    /// `{}`) is rejected.
    pub fn new(args: &'a Value) -> Result<Self, ArgError> {
        if args.is_object() || args.is_null() {
            Ok(Self { args })
        } else {
            Err(err("arguments must be a JSON object"))
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.args.get(key)
    }

    /// Verify that every listed key is present.
    pub fn ensure_required(&self, keys: &[&str]) -> Result<(), ArgError> {
        for key in keys {
            if self.get(key).map(|v| v.is_null()).unwrap_or(true) {
                return Err(err(format!("missing required parameter '{key}'")));
            }
        }
        Ok(())
    }

    pub fn require_str(&self, key: &str) -> Result<&'a str, ArgError> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(err(format!("parameter '{key}' must be a string"))),
            None => Err(err(format!("missing required parameter '{key}'"))),
        }
    }

    /// Required string with a maximum byte length.
    pub fn require_str_capped(&self, key: &str, max: usize) -> Result<&'a str, ArgError> {
        let s = self.require_str(key)?;
        if s.len() > max {
            return Err(err(format!(
                "parameter '{key}' exceeds {max} bytes ({} given)",
                s.len()
            )));
        }
        Ok(s)
    }

    pub fn str_or(&self, key: &str, default: &'a str) -> &'a str {
        match self.get(key) {
            Some(Value::String(s)) => s,
            _ => default,
        }
    }

    pub fn opt_str(&self, key: &str) -> Option<&'a str> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    /// Required integer constrained to `[min, max]`.
    pub fn require_u64_in(&self, key: &str, min: u64, max: u64) -> Result<u64, ArgError> {
        let n = self
            .get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| err(format!("missing or non-integer parameter '{key}'")))?;
        if n < min || n > max {
            return Err(err(format!(
                "parameter '{key}' must be between {min} and {max}"
            )));
        }
        Ok(n)
    }

    /// Optional integer constrained to `[min, max]` when present.
    pub fn opt_u64_in(&self, key: &str, min: u64, max: u64) -> Result<Option<u64>, ArgError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => {
                let n = v
                    .as_u64()
                    .ok_or_else(|| err(format!("parameter '{key}' must be an integer")))?;
                if n < min || n > max {
                    return Err(err(format!(
                        "parameter '{key}' must be between {min} and {max}"
                    )));
                }
                Ok(Some(n))
            }
        }
    }

    pub fn f64_in(&self, key: &str, min: f64, max: f64, default: f64) -> Result<f64, ArgError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => {
                let n = v
                    .as_f64()
                    .ok_or_else(|| err(format!("parameter '{key}' must be a number")))?;
                if n < min || n > max {
                    return Err(err(format!(
                        "parameter '{key}' must be between {min} and {max}"
                    )));
                }
                Ok(n)
            }
        }
    }

    /// Required path-shaped string: non-empty, ≤ 260 chars.  Workspace
    /// sandboxing is applied separately by `validate::sanitize_path`.
    pub fn require_path(&self, key: &str) -> Result<&'a str, ArgError> {
        let s = self.require_str(key)?;
        if s.is_empty() {
            return Err(err(format!("parameter '{key}' must not be empty")));
        }
        if s.len() > MAX_PATH_LEN {
            return Err(err(format!(
                "parameter '{key}' exceeds the {MAX_PATH_LEN}-character path limit"
            )));
        }
        Ok(s)
    }

    /// Required free-form text with the default 1 MiB cap.
    pub fn require_text(&self, key: &str) -> Result<&'a str, ArgError> {
        self.require_str_capped(key, MAX_INPUT_LEN)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn non_object_arguments_rejected() {
        assert!(ToolArgs::new(&json!([1, 2])).is_err());
        assert!(ToolArgs::new(&json!("str")).is_err());
        assert!(ToolArgs::new(&json!({})).is_ok());
        assert!(ToolArgs::new(&Value::Null).is_ok());
    }

    #[test]
    fn require_str_happy_and_sad_paths() {
        let v = json!({"name": "x", "n": 3});
        let args = ToolArgs::new(&v).unwrap();
        assert_eq!(args.require_str("name").unwrap(), "x");
        assert!(args.require_str("n").is_err());
        assert!(args.require_str("missing").is_err());
    }

    #[test]
    fn ensure_required_reports_first_missing_key() {
        let v = json!({"a": 1, "b": null});
        let args = ToolArgs::new(&v).unwrap();
        assert!(args.ensure_required(&["a"]).is_ok());
        let e = args.ensure_required(&["a", "b"]).unwrap_err();
        assert!(e.0.contains("'b'"));
    }

    #[test]
    fn defaults_apply_when_absent_or_wrong_type() {
        let v = json!({"flag": "yes"});
        let args = ToolArgs::new(&v).unwrap();
        assert!(args.bool_or("flag", true), "non-bool falls back to default");
        assert_eq!(args.u64_or("count", 7), 7);
        assert_eq!(args.str_or("mode", "auto"), "auto");
    }

    #[test]
    fn range_checks() {
        let v = json!({"port": 80, "t": 0.5});
        let args = ToolArgs::new(&v).unwrap();
        assert!(args.require_u64_in("port", 1024, 65535).is_err());
        assert_eq!(args.f64_in("t", 0.0, 1.0, 0.2).unwrap(), 0.5);
        assert!(args.f64_in("t", 0.6, 1.0, 0.2).is_err());
        assert_eq!(args.f64_in("absent", 0.0, 1.0, 0.2).unwrap(), 0.2);
    }

    #[test]
    fn opt_u64_in_distinguishes_absent_from_invalid() {
        let v = json!({"n": 500});
        let args = ToolArgs::new(&v).unwrap();
        assert_eq!(args.opt_u64_in("absent", 0, 10).unwrap(), None);
        assert!(args.opt_u64_in("n", 0, 10).is_err());
        assert_eq!(args.opt_u64_in("n", 0, 1000).unwrap(), Some(500));
    }

    #[test]
    fn path_length_cap_enforced() {
        let long = "p".repeat(300);
        let v = json!({"path": long, "ok": "src/a.rs"});
        let args = ToolArgs::new(&v).unwrap();
        assert!(args.require_path("path").is_err());
        assert_eq!(args.require_path("ok").unwrap(), "src/a.rs");
    }

    #[test]
    fn string_cap_enforced() {
        let v = json!({"body": "abcdef"});
        let args = ToolArgs::new(&v).unwrap();
        assert!(args.require_str_capped("body", 3).is_err());
        assert_eq!(args.require_str_capped("body", 10).unwrap(), "abcdef");
    }
}
