//! Sticky bucket assignment through a per-test cookie.
//!
//! There is no server-side session state. A visitor's bucket for a test is the
//! value of the cookie named after the test id, and it is written once when the
//! visitor is first assigned (or when a debug override rebinds them).

use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};

use crate::error::{Error, ErrorDetails};
use crate::experimentation::BucketId;

/// 30 days.
pub const ASSIGNMENT_COOKIE_MAX_AGE_SECS: u64 = 2_592_000;

const MAX_TOKEN_LEN: usize = 64;

/// Whether `value` is usable as a test id, a bucket id, or a cookie name.
///
/// Accepts 1 to 64 characters of `[A-Za-z0-9_-]`, which covers `control`.
pub fn is_valid_token(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_TOKEN_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Every `name=value` pair across all `Cookie` headers, in order.
/// Headers that are not valid UTF-8 and pairs without `=` are skipped.
fn cookie_pairs(headers: &HeaderMap) -> impl Iterator<Item = (&str, &str)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((name.trim(), value))
        })
}

/// The first value of the cookie called `name`, if any.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    cookie_pairs(headers).find_map(|(n, value)| (n == name).then_some(value))
}

/// The bucket this visitor is bound to for `test_id`.
///
/// Malformed values are treated as absent. When the cookie appears more than
/// once, the first well-formed value wins. The returned bucket is not checked
/// against the test definition; a bucket that no longer exists is a stale binding.
pub fn lookup(headers: &HeaderMap, test_id: &str) -> Option<BucketId> {
    cookie_pairs(headers)
        .filter(|(name, _)| *name == test_id)
        .find(|(_, value)| is_valid_token(value))
        .map(|(_, value)| BucketId::from_token(value))
}

/// The `Set-Cookie` value binding a visitor to `bucket_id` for `test_id`.
pub fn assignment_cookie(test_id: &str, bucket_id: &BucketId) -> String {
    format!(
        "{test_id}={bucket_id}; Path=/; Max-Age={ASSIGNMENT_COOKIE_MAX_AGE_SECS}; HttpOnly; Secure; SameSite=Lax"
    )
}

/// Appends the assignment cookie to `headers`.
pub fn bind(headers: &mut HeaderMap, test_id: &str, bucket_id: &BucketId) -> Result<(), Error> {
    let cookie = assignment_cookie(test_id, bucket_id);
    let value = HeaderValue::from_str(&cookie).map_err(|e| {
        Error::new(ErrorDetails::InternalError {
            message: format!("Failed to build assignment cookie for test `{test_id}`: {e}"),
        })
    })?;
    headers.append(SET_COOKIE, value);
    Ok(())
}
