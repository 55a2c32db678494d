//! Canonical key/value form of a command batch.
//!
//! Pairs are sorted by key (bytewise, stable for duplicates) and joined as
//! `k=v` with `&`. The `hmac` tag is matched case-insensitively and never
//! part of the canonical text.

use serde_json::Value;

use crate::error::{AuthError, AuthResult};

/// Key under which requests carry their signature.
pub const TAG_KEY: &str = "hmac";

fn is_tag(key: &str) -> bool {
    key.eq_ignore_ascii_case(TAG_KEY)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Pairs of one request with its tag split off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedRequest {
    pub pairs: Vec<KeyValue>,
    pub tag: Option<String>,
}

impl SignedRequest {
    /// Add a pair, diverting the tag.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if is_tag(&key) {
            self.tag = Some(value.into());
        } else {
            self.pairs.push(KeyValue::new(key, value));
        }
    }

    pub fn canonical(&self) -> String {
        canonicalize(&self.pairs)
    }
}

/// Sorted `k=v&k=v` text of `pairs`, tag excluded.
pub fn canonicalize(pairs: &[KeyValue]) -> String {
    let mut sorted: Vec<&KeyValue> = pairs.iter().filter(|kv| !is_tag(&kv.key)).collect();
    sorted.sort_by(|a, b| a.key.as_bytes().cmp(b.key.as_bytes()));
    sorted
        .iter()
        .map(|kv| format!("{}={}", kv.key, kv.value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Split `a=1&b=2&hmac=..` into pairs. Pieces without `=` are ignored;
/// nothing is percent-decoded.
pub fn parse_query(qs: &str) -> SignedRequest {
    let mut req = SignedRequest::default();
    for piece in qs.trim_start_matches('?').split('&') {
        if let Some((key, value)) = piece.split_once('=') {
            req.push(key, value);
        }
    }
    req
}

/// Flatten a JSON object of scalars into pairs.
///
/// Booleans become `true`/`false`, integers are written verbatim, other
/// numbers use [`format_float`] and strings are taken as-is.
pub fn parse_json(json: &str) -> AuthResult<SignedRequest> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| AuthError::Malformed(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(AuthError::Malformed("expected a JSON object".into()));
    };

    let mut req = SignedRequest::default();
    for (key, value) in map {
        let text = match value {
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.to_string()
                } else if let Some(u) = n.as_u64() {
                    u.to_string()
                } else {
                    format_float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => s,
            Value::Null => "null".to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(AuthError::Malformed(format!("`{key}` is not a scalar")));
            }
        };
        req.push(key, text);
    }
    Ok(req)
}

/// Shortest form with six significant digits, as C's `%.6g` prints.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.into();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.into();
    }

    let sci = format!("{v:.5e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if !(-4..6).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
    } else {
        let precision = (5 - exp) as usize;
        trim_fraction(&format!("{v:.precision$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
