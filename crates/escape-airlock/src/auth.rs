// ABOUTME: Ship login: exchanges an access code for the session cookie
// ABOUTME: Also ship URL normalization and cookie parsing helpers

use std::time::Duration;

use reqwest::header::SET_COOKIE;
use reqwest::{redirect, Client};

use crate::error::AirlockError;

/// Prefix of the session cookie a ship sets on login.
const AUTH_COOKIE_PREFIX: &str = "urbauth-~";

/// Client suitable for [`login`]: redirects off so the login response's
/// `set-cookie` is visible.
pub fn login_client() -> Result<Client, AirlockError> {
    Client::builder()
        .redirect(redirect::Policy::none())
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AirlockError::Transport(format!("failed to create HTTP client: {e}")))
}

/// Log in to the ship at `base_url` and return the session cookie
/// (`urbauth-~<ship>=<token>`).
pub async fn login(http: &Client, base_url: &str, password: &str) -> Result<String, AirlockError> {
    let base_url = normalize_ship_url(base_url)?;
    let url = format!("{base_url}/~/login");
    tracing::debug!(%url, "logging in");

    let resp = http
        .post(&url)
        .form(&[("password", password)])
        .send()
        .await?;

    let status = resp.status();
    let cookie = resp
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.contains(AUTH_COOKIE_PREFIX))
        .map(cookie_pair);

    match cookie {
        Some(cookie) => {
            tracing::info!(ship = ?ship_from_cookie(&cookie), "logged in");
            Ok(cookie)
        }
        None if status.is_client_error() || status.is_success() => {
            Err(AirlockError::Auth("invalid access code".into()))
        }
        None => Err(AirlockError::Http {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        }),
    }
}

/// Ship name from an auth cookie, without the `~`.
pub fn ship_from_cookie(cookie: &str) -> Option<String> {
    let start = cookie.find(AUTH_COOKIE_PREFIX)? + AUTH_COOKIE_PREFIX.len();
    let rest = &cookie[start..];
    let end = rest.find('=')?;
    let ship = &rest[..end];
    (!ship.is_empty()).then(|| ship.to_string())
}

/// Access codes are four dash-separated groups of six letters.
pub fn is_valid_access_code(code: &str) -> bool {
    let groups: Vec<&str> = code.split('-').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| g.len() == 6 && g.chars().all(|c| c.is_ascii_alphabetic()))
}

/// Normalize user input into a base URL: `https://` is assumed when no scheme
/// is given, and a trailing slash or `/apps/escape` suffix is dropped.
pub fn normalize_ship_url(input: &str) -> Result<String, AirlockError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AirlockError::InvalidUrl("ship URL is empty".into()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let stripped = with_scheme.trim_end_matches('/');
    let stripped = stripped.strip_suffix("/apps/escape").unwrap_or(stripped);

    let parsed = url::Url::parse(stripped)?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(AirlockError::InvalidUrl(format!("unsupported scheme: {other}"))),
    }
    if parsed.host_str().is_none() {
        return Err(AirlockError::InvalidUrl(format!("no host in {stripped}")));
    }
    Ok(stripped.to_string())
}

/// `name=value` from a `set-cookie` header, dropping its attributes.
fn cookie_pair(header: &str) -> String {
    header.split(';').next().unwrap_or(header).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ship_from_cookie() {
        assert_eq!(
            ship_from_cookie("urbauth-~sampel-palnet=0v3.abcde; Path=/; Max-Age=604800"),
            Some("sampel-palnet".to_string())
        );
        assert_eq!(ship_from_cookie("session=abc"), None);
        assert_eq!(ship_from_cookie("urbauth-~=0v1"), None);
    }

    #[test]
    fn test_cookie_pair_drops_attributes() {
        assert_eq!(
            cookie_pair("urbauth-~zod=0v1.xyz; Path=/; Max-Age=604800"),
            "urbauth-~zod=0v1.xyz"
        );
        assert_eq!(cookie_pair("urbauth-~zod=0v1"), "urbauth-~zod=0v1");
    }

    #[test]
    fn test_access_code_format() {
        assert!(is_valid_access_code("lidlut-tabwed-pillex-ridrup"));
        assert!(!is_valid_access_code("lidlut-tabwed-pillex"));
        assert!(!is_valid_access_code("lidlut-tabwed-pillex-ridru9"));
        assert!(!is_valid_access_code(""));
    }

    #[test]
    fn test_normalize_ship_url() {
        assert_eq!(
            normalize_ship_url("sampel-palnet.arvo.network").unwrap(),
            "https://sampel-palnet.arvo.network"
        );
        assert_eq!(
            normalize_ship_url("http://localhost:8080/").unwrap(),
            "http://localhost:8080"
        );
        assert_eq!(
            normalize_ship_url("https://zod.example.com/apps/escape/").unwrap(),
            "https://zod.example.com"
        );
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        assert!(matches!(
            normalize_ship_url("  "),
            Err(AirlockError::InvalidUrl(_))
        ));
        assert!(matches!(
            normalize_ship_url("ftp://zod.example.com"),
            Err(AirlockError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_login_to_unreachable_ship() {
        let http = login_client().unwrap();
        let err = login(&http, "http://127.0.0.1:1", "lidlut-tabwed-pillex-ridrup")
            .await
            .unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err:?}");
    }
}
