//! HTTP Basic credentials (RFC 7617)
//!
//! Tunnels that protect their public endpoint register the exact header value
//! a browser sends after a Basic challenge:
//!
//! ```text
//! Authorization: Basic <base64(username:password)>
//! ```

use crate::AuthError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Build the `Authorization` header value for `username:password`
///
/// # Example
/// ```
/// use portico_http_auth::basic_credential;
///
/// assert_eq!(basic_credential("user", "pass"), "Basic dXNlcjpwYXNz");
/// ```
pub fn basic_credential(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{}:{}", username, password)))
}

/// Split a `username:password` pair as given on the command line
///
/// The password may contain further colons; the username may not be empty.
pub fn parse_user_password(value: &str) -> Result<(&str, &str), AuthError> {
    match value.split_once(':') {
        Some((user, password)) if !user.is_empty() => Ok((user, password)),
        _ => Err(AuthError::InvalidFormat(format!(
            "expected username:password, got '{}'",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_credential_encoding() {
        assert_eq!(
            basic_credential("admin", "secret123"),
            "Basic YWRtaW46c2VjcmV0MTIz"
        );
    }

    #[test]
    fn test_basic_credential_empty_password() {
        assert_eq!(basic_credential("user", ""), "Basic dXNlcjo=");
    }

    #[test]
    fn test_parse_user_password() {
        assert_eq!(parse_user_password("user:pass"), Ok(("user", "pass")));
        assert_eq!(parse_user_password("user:a:b"), Ok(("user", "a:b")));
        assert_eq!(parse_user_password("user:"), Ok(("user", "")));
    }

    #[test]
    fn test_parse_user_password_invalid() {
        assert!(parse_user_password("nocolon").is_err());
        assert!(parse_user_password(":pass").is_err());
    }
}
