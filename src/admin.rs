//! Best-effort push of call metadata to the admin ingest endpoint.
//!
//! Fire-and-forget: every failure mode (network, HTTP status, decode) is
//! converted to a `false` result and logged. Redirects are followed manually
//! because the ingest endpoint sits behind a proxy that rewrites locations;
//! 307/308 semantics require re-issuing the same POST and body on each hop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECT_HOPS: u32 = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    call_session_id: Option<String>,
}

pub struct AdminClient {
    http: reqwest::Client,
    base: Url,
    enabled: bool,
}

impl AdminClient {
    pub fn new(config: &Config) -> Result<Self> {
        // automatic redirects disabled: hops are followed manually so the
        // POST method and body survive 301/302/303 rewrites
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base = Url::parse(&config.admin_api_base)?;
        Ok(Self {
            http,
            base,
            enabled: config.enable_admin_push,
        })
    }

    /// Spawn the push on its own task so it never stalls a pump.
    pub fn push_fire_and_forget(self: Arc<Self>, payload: Value, call_id: String) {
        tokio::spawn(async move {
            self.push_call_data(&payload, &call_id).await;
        });
    }

    /// POST the payload to `/api/calls/ingest`, following up to
    /// [`MAX_REDIRECT_HOPS`] redirects. Returns `true` only on HTTP 200.
    pub async fn push_call_data(&self, payload: &Value, call_id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let Ok(mut url) = self.base.join("/api/calls/ingest") else {
            warn!(call_id, "invalid admin base url");
            return false;
        };

        // initial request plus up to MAX_REDIRECT_HOPS followed redirects
        for _ in 0..=MAX_REDIRECT_HOPS {
            let resp = match self.http.post(url.clone()).json(payload).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(call_id, "admin push request failed: {e}");
                    return false;
                }
            };
            let status = resp.status();
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            match redirect_step(status, location.as_deref(), &self.base) {
                RedirectStep::Follow(next) => {
                    debug!(call_id, %status, next = %next, "following admin redirect");
                    url = next;
                }
                RedirectStep::Fail => {
                    warn!(call_id, %status, "admin redirect without usable location");
                    return false;
                }
                RedirectStep::NotRedirect => {
                    if status != StatusCode::OK {
                        warn!(call_id, %status, "admin ingest returned non-200");
                        return false;
                    }
                    // a 200 whose body does not decode still counts as failure
                    return match resp.json::<IngestResponse>().await {
                        Ok(body) => {
                            info!(
                                call_id,
                                session = body.call_session_id.as_deref().unwrap_or("OK"),
                                "pushed call data to admin"
                            );
                            true
                        }
                        Err(e) => {
                            warn!(call_id, "admin ingest response decode error: {e}");
                            false
                        }
                    };
                }
            }
        }

        warn!(call_id, "admin ingest exceeded redirect budget of {MAX_REDIRECT_HOPS}");
        false
    }
}

#[derive(Debug, PartialEq)]
enum RedirectStep {
    /// Re-issue the same POST and body against this resolved target
    Follow(Url),
    /// Redirect status without a resolvable Location header
    Fail,
    NotRedirect,
}

/// Decide what one response means for the redirect loop. Relative `Location`
/// targets resolve against the configured base URL.
fn redirect_step(status: StatusCode, location: Option<&str>, base: &Url) -> RedirectStep {
    match status.as_u16() {
        301 | 302 | 303 | 307 | 308 => match location.and_then(|l| base.join(l).ok()) {
            Some(next) => RedirectStep::Follow(next),
            None => RedirectStep::Fail,
        },
        _ => RedirectStep::NotRedirect,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn base() -> Url {
        Url::parse("http://127.0.0.1:3100").unwrap()
    }

    /// Serve one canned HTTP response on an ephemeral port.
    async fn one_shot_http(response: &'static str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        addr
    }

    fn client_for(addr: std::net::SocketAddr) -> AdminClient {
        let config = Config {
            admin_api_base: format!("http://{addr}"),
            ..Config::default()
        };
        AdminClient::new(&config).unwrap()
    }

    #[test]
    fn non_redirect_statuses_pass_through() {
        for status in [StatusCode::OK, StatusCode::BAD_REQUEST, StatusCode::INTERNAL_SERVER_ERROR] {
            assert_eq!(
                redirect_step(status, Some("/elsewhere"), &base()),
                RedirectStep::NotRedirect
            );
        }
    }

    #[test]
    fn relative_location_resolves_against_base() {
        let step = redirect_step(StatusCode::FOUND, Some("/v2/calls/ingest"), &base());
        match step {
            RedirectStep::Follow(url) => {
                assert_eq!(url.as_str(), "http://127.0.0.1:3100/v2/calls/ingest");
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn absolute_location_replaces_base() {
        let step = redirect_step(
            StatusCode::PERMANENT_REDIRECT,
            Some("https://ingest.example.com/api/calls/ingest"),
            &base(),
        );
        match step {
            RedirectStep::Follow(url) => {
                assert_eq!(url.host_str(), Some("ingest.example.com"));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn all_manual_redirect_codes_are_followed() {
        for code in [301u16, 302, 303, 307, 308] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(matches!(
                redirect_step(status, Some("/x"), &base()),
                RedirectStep::Follow(_)
            ));
        }
    }

    #[test]
    fn redirect_without_location_fails() {
        assert_eq!(
            redirect_step(StatusCode::MOVED_PERMANENTLY, None, &base()),
            RedirectStep::Fail
        );
    }

    #[tokio::test]
    async fn decode_error_on_200_is_a_failure() {
        let addr = one_shot_http(
            "HTTP/1.1 200 OK\r\ncontent-length: 16\r\nconnection: close\r\n\r\nthis is not json",
        )
        .await;
        let client = client_for(addr);
        let pushed = client
            .push_call_data(&serde_json::json!({"ucid": "u-1"}), "u-1")
            .await;
        assert!(!pushed);
    }

    #[tokio::test]
    async fn valid_200_body_reports_success() {
        let addr = one_shot_http(
            "HTTP/1.1 200 OK\r\ncontent-length: 24\r\nconnection: close\r\n\r\n{\"callSessionId\":\"cs-1\"}",
        )
        .await;
        let client = client_for(addr);
        let pushed = client
            .push_call_data(&serde_json::json!({"ucid": "u-1"}), "u-1")
            .await;
        assert!(pushed);
    }

    #[tokio::test]
    async fn disabled_client_reports_failure_without_network() {
        let config = Config {
            enable_admin_push: false,
            ..Config::default()
        };
        let client = AdminClient::new(&config).unwrap();
        let pushed = client
            .push_call_data(&serde_json::json!({"ucid": "x"}), "x")
            .await;
        assert!(!pushed);
    }
}
