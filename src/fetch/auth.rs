//! Authentication handshakes.
//!
//! Each mode produces the headers added to every later request. The session
//! mode additionally leaves its cookie in the client's cookie store.

use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::config::{AuthConfig, env_nonempty};
use crate::remote::snippet;

use super::FetchError;

const API_KEY_HEADER: &str = "x-api-key";
const CSRF_HEADER: &str = "x-csrf-token";

/// Run the handshake for `auth` and return the headers it yields.
pub(super) async fn authenticate(
    client: &Client,
    base_url: &str,
    auth: &AuthConfig,
) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();

    match auth {
        AuthConfig::None => {}

        AuthConfig::ProxmoxToken {
            token_id_env,
            token_secret_env,
        } => {
            let token_id = env_nonempty(token_id_env);
            let token_secret = token_secret_env.as_deref().and_then(env_nonempty);
            let (Some(id), Some(secret)) = (token_id, token_secret) else {
                return Err(FetchError::Auth(format!(
                    "missing Proxmox credentials, checked {} and {}",
                    token_id_env,
                    token_secret_env.as_deref().unwrap_or("<unset token_secret_env>")
                )));
            };
            headers.insert(
                AUTHORIZATION,
                sensitive(&format!("PVEAPIToken={id}={secret}"))?,
            );
        }

        AuthConfig::UnifiApiKey { api_key_env } => {
            let key = env_nonempty(api_key_env).ok_or_else(|| {
                FetchError::Auth(format!("missing UniFi API key in env: {api_key_env}"))
            })?;
            headers.insert(HeaderName::from_static(API_KEY_HEADER), sensitive(&key)?);
        }

        AuthConfig::UnifiOsSession {
            username_env,
            password_env,
            login_path,
        } => {
            let (Some(username), Some(password)) =
                (env_nonempty(username_env), env_nonempty(password_env))
            else {
                return Err(FetchError::Auth(format!(
                    "missing UniFi OS credentials in {username_env}/{password_env}"
                )));
            };
            if base_url.is_empty() {
                return Err(FetchError::Auth(
                    "http.base_url is required for unifi_os_session auth".to_string(),
                ));
            }

            let url = format!("{}{}", base_url.trim_end_matches('/'), login_path);
            tracing::debug!(url = %url, "Logging in to UniFi OS");

            let response = client
                .post(&url)
                .json(&serde_json::json!({ "username": username, "password": password }))
                .send()
                .await
                .map_err(|e| FetchError::Auth(format!("UniFi OS login connection failed: {e}")))?;

            let status = response.status();
            let csrf = response.headers().get(CSRF_HEADER).cloned();
            if status.as_u16() >= 400 {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Auth(format!(
                    "UniFi OS login failed: HTTP {} {}",
                    status.as_u16(),
                    snippet(&body)
                )));
            }

            match csrf {
                Some(token) => {
                    headers.insert(HeaderName::from_static(CSRF_HEADER), token);
                }
                None => tracing::debug!("UniFi OS login returned no CSRF token"),
            }
        }
    }

    Ok(headers)
}

fn sensitive(value: &str) -> Result<HeaderValue, FetchError> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| FetchError::Auth("credential contains invalid header characters".into()))?;
    header.set_sensitive(true);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn set_env(name: &str, value: &str) {
        // SAFETY: test-specific variable names, unique per test.
        unsafe {
            std::env::set_var(name, value);
        }
    }

    #[tokio::test]
    async fn test_none_yields_no_headers() {
        let headers = authenticate(&Client::new(), "", &AuthConfig::None)
            .await
            .unwrap();
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn test_proxmox_token_header() {
        set_env("HOMESPOOL_TEST_PVE_ID", "root@pam!collector");
        set_env("HOMESPOOL_TEST_PVE_SECRET", "s3cr3t");
        let auth = AuthConfig::ProxmoxToken {
            token_id_env: "HOMESPOOL_TEST_PVE_ID".to_string(),
            token_secret_env: Some("HOMESPOOL_TEST_PVE_SECRET".to_string()),
        };

        let headers = authenticate(&Client::new(), "", &auth).await.unwrap();
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "PVEAPIToken=root@pam!collector=s3cr3t"
        );
    }

    #[tokio::test]
    async fn test_proxmox_missing_secret_is_auth_error() {
        set_env("HOMESPOOL_TEST_PVE_ID_ONLY", "root@pam!collector");
        let auth = AuthConfig::ProxmoxToken {
            token_id_env: "HOMESPOOL_TEST_PVE_ID_ONLY".to_string(),
            token_secret_env: None,
        };

        let err = authenticate(&Client::new(), "", &auth).await.unwrap_err();
        assert!(matches!(err, FetchError::Auth(msg) if msg.contains("HOMESPOOL_TEST_PVE_ID_ONLY")));
    }

    #[tokio::test]
    async fn test_unifi_api_key_header() {
        set_env("HOMESPOOL_TEST_UNIFI_KEY", "k-123");
        let auth = AuthConfig::UnifiApiKey {
            api_key_env: "HOMESPOOL_TEST_UNIFI_KEY".to_string(),
        };

        let headers = authenticate(&Client::new(), "", &auth).await.unwrap();
        assert_eq!(headers.get("X-API-KEY").unwrap().to_str().unwrap(), "k-123");
    }

    #[tokio::test]
    async fn test_unifi_os_session_captures_csrf() {
        set_env("HOMESPOOL_TEST_UOS_USER", "admin");
        set_env("HOMESPOOL_TEST_UOS_PASS", "pw");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_json(serde_json::json!({"username": "admin", "password": "pw"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Csrf-Token", "csrf-abc")
                    .insert_header("Set-Cookie", "TOKEN=xyz; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let auth = AuthConfig::UnifiOsSession {
            username_env: "HOMESPOOL_TEST_UOS_USER".to_string(),
            password_env: "HOMESPOOL_TEST_UOS_PASS".to_string(),
            login_path: "/api/auth/login".to_string(),
        };
        let headers = authenticate(&Client::new(), &server.uri(), &auth).await.unwrap();
        assert_eq!(headers.get(CSRF_HEADER).unwrap().to_str().unwrap(), "csrf-abc");
    }

    #[tokio::test]
    async fn test_unifi_os_session_rejected_login() {
        set_env("HOMESPOOL_TEST_UOS_USER2", "admin");
        set_env("HOMESPOOL_TEST_UOS_PASS2", "wrong");
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let auth = AuthConfig::UnifiOsSession {
            username_env: "HOMESPOOL_TEST_UOS_USER2".to_string(),
            password_env: "HOMESPOOL_TEST_UOS_PASS2".to_string(),
            login_path: "/api/auth/login".to_string(),
        };
        let err = authenticate(&Client::new(), &server.uri(), &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Auth(msg) if msg.contains("HTTP 401")));
    }
}
