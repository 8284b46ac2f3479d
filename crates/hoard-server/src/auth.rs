use axum::http::HeaderMap;
use base64::Engine;

/// Single-owner authentication modes, in the `CAMLI_AUTH` syntax.
#[derive(Clone, Debug, Default)]
pub enum AuthMode {
    /// No authentication; everything is allowed.
    #[default]
    None,
    /// HTTP basic auth: `userpass:<user>:<pass>`.
    UserPass { user: String, pass: String },
    /// Bearer token: `token:<token>`.
    Token(String),
}

impl AuthMode {
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.is_empty() || s == "none" {
            return Ok(AuthMode::None);
        }
        if let Some(rest) = s.strip_prefix("userpass:") {
            let (user, pass) = rest
                .split_once(':')
                .ok_or_else(|| "userpass wants user:pass".to_string())?;
            return Ok(AuthMode::UserPass {
                user: user.to_string(),
                pass: pass.to_string(),
            });
        }
        if let Some(token) = s.strip_prefix("token:") {
            return Ok(AuthMode::Token(token.to_string()));
        }
        Err(format!("unknown auth mode {s:?}"))
    }

    /// Whether a request carrying `headers` is the owner.
    pub fn allows(&self, headers: &HeaderMap) -> bool {
        match self {
            AuthMode::None => true,
            AuthMode::UserPass { user, pass } => {
                let Some(value) = auth_header(headers) else {
                    return false;
                };
                let Some(b64) = value.strip_prefix("Basic ") else {
                    return false;
                };
                let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(b64) else {
                    return false;
                };
                let Ok(creds) = String::from_utf8(decoded) else {
                    return false;
                };
                creds == format!("{user}:{pass}")
            }
            AuthMode::Token(token) => {
                auth_header(headers).is_some_and(|v| v == format!("Bearer {token}"))
            }
        }
    }
}

fn auth_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(value).unwrap(),
        );
        h
    }

    #[test]
    fn parse_modes() {
        assert!(matches!(AuthMode::parse("").unwrap(), AuthMode::None));
        assert!(matches!(AuthMode::parse("none").unwrap(), AuthMode::None));
        assert!(matches!(
            AuthMode::parse("userpass:alice:secret").unwrap(),
            AuthMode::UserPass { .. }
        ));
        assert!(matches!(
            AuthMode::parse("token:abc").unwrap(),
            AuthMode::Token(_)
        ));
        assert!(AuthMode::parse("kerberos:nope").is_err());
    }

    #[test]
    fn userpass_checks_basic_header() {
        let mode = AuthMode::parse("userpass:alice:secret").unwrap();
        let good = base64::engine::general_purpose::STANDARD.encode("alice:secret");
        assert!(mode.allows(&headers_with(&format!("Basic {good}"))));
        let bad = base64::engine::general_purpose::STANDARD.encode("alice:wrong");
        assert!(!mode.allows(&headers_with(&format!("Basic {bad}"))));
        assert!(!mode.allows(&HeaderMap::new()));
    }

    #[test]
    fn token_checks_bearer() {
        let mode = AuthMode::parse("token:t0ps3cret").unwrap();
        assert!(mode.allows(&headers_with("Bearer t0ps3cret")));
        assert!(!mode.allows(&headers_with("Bearer other")));
    }

    #[test]
    fn none_allows_anything() {
        assert!(AuthMode::None.allows(&HeaderMap::new()));
    }
}
