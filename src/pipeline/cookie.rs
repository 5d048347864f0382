//! In-memory cookie jar keyed by host

use super::{boxed, Next, Policy};
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse};
use futures::future::BoxFuture;
use reqwest::header::{HeaderValue, COOKIE, SET_COOKIE};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Stores `Set-Cookie` values and replays them to the same host
#[derive(Debug, Default)]
pub struct CookiePolicy {
    jar: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl CookiePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn cookie_header(&self, host: &str) -> Option<HeaderValue> {
        let jar = self.jar.lock().unwrap_or_else(|e| e.into_inner());
        let cookies = jar.get(host).filter(|c| !c.is_empty())?;
        let joined = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&joined).ok()
    }

    fn store(&self, host: &str, response: &HttpResponse) {
        let mut jar = self.jar.lock().unwrap_or_else(|e| e.into_inner());
        for value in response.headers.get_all(SET_COOKIE) {
            let Some((name, value, expired)) = value.to_str().ok().and_then(parse_set_cookie) else {
                continue;
            };
            let cookies = jar.entry(host.to_string()).or_default();
            if expired {
                cookies.remove(&name);
            } else {
                cookies.insert(name, value);
            }
        }
    }
}

/// `name=value; attrs...` into (name, value, expired)
fn parse_set_cookie(raw: &str) -> Option<(String, String, bool)> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let expired = parts.any(|attr| {
        attr.split_once('=')
            .map(|(k, v)| {
                k.trim().eq_ignore_ascii_case("max-age") && v.trim().starts_with(['0', '-'])
            })
            .unwrap_or(false)
    });
    Some((name.to_string(), value.trim().to_string(), expired))
}

impl Policy for CookiePolicy {
    fn name(&self) -> &'static str {
        "cookie"
    }

    fn process<'a>(
        &'a self,
        mut request: HttpRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        boxed(async move {
            let host = request.url.host_str().unwrap_or_default().to_string();
            if let Some(cookie) = self.cookie_header(&host) {
                request.set_header(COOKIE, cookie);
            }
            let response = next.run(request).await?;
            self.store(&host, &response);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{get, MockTransport};
    use crate::pipeline::Pipeline;
    use reqwest::header::HeaderMap;
    use std::sync::Arc;

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("session=abc; Path=/; HttpOnly"),
            Some(("session".to_string(), "abc".to_string(), false))
        );
        assert_eq!(
            parse_set_cookie("session=; Max-Age=0"),
            Some(("session".to_string(), String::new(), true))
        );
        assert_eq!(parse_set_cookie("garbage"), None);
    }

    #[tokio::test]
    async fn test_cookies_are_replayed_per_host() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        let transport = Arc::new(
            MockTransport::new()
                .respond_with(200, headers, "")
                .respond(200, "")
                .respond(200, ""),
        );
        let pipeline = Pipeline::builder()
            .policy(CookiePolicy::new())
            .transport_arc(transport.clone())
            .build();

        pipeline.send(get("https://a.example.com/login")).await.unwrap();
        pipeline.send(get("https://a.example.com/data")).await.unwrap();
        pipeline.send(get("https://b.example.com/data")).await.unwrap();

        let seen = transport.requests();
        assert_eq!(seen[0].header("cookie"), None);
        assert_eq!(seen[1].header("cookie"), Some("a=1; b=2"));
        assert_eq!(seen[2].header("cookie"), None);
    }
}
