use std::time::Duration;

use reqwest::header::{HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::errors::{AppError, AppResult};
use crate::models::HttpState;
use crate::util;

const MAX_TRY: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Statuses worth a second attempt; everything else in the error range
/// fails immediately.
fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        408 | 409 | 425 | 429 | 500 | 502 | 503 | 504
    )
}

fn is_error_response(status: StatusCode) -> bool {
    status.as_u16() >= 400
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn get(url: &str) -> Self {
        FetchRequest {
            method: Method::GET,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }
}

/// A completed response with enough retained state for charset
/// decoding and conditional-GET bookkeeping.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub bytes: Vec<u8>,
}

impl Page {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Body decoded with the Content-Type charset, falling back to
    /// UTF-8.
    pub fn text(&self) -> String {
        decode_bytes(&self.bytes, self.content_type_charset().as_deref())
    }

    fn content_type_charset(&self) -> Option<String> {
        let content_type = self.header("content-type")?;
        content_type.split(';').skip(1).find_map(|param| {
            let mut parts = param.splitn(2, '=');
            let key = parts.next()?.trim();
            let value = parts.next()?.trim().trim_matches('"');
            key.eq_ignore_ascii_case("charset").then(|| value.to_string())
        })
    }

    /// Updated conditional-GET state, or `None` when the server sent
    /// neither validator.
    pub fn http_state(&self) -> Option<HttpState> {
        let last_modified = self.header(LAST_MODIFIED.as_str());
        let etag = self.header(ETAG.as_str());
        if last_modified.is_none() && etag.is_none() {
            return None;
        }
        Some(HttpState {
            last_modified: Some(last_modified.unwrap_or_default().to_string()),
            etag: Some(etag.unwrap_or_default().to_string()),
        })
    }
}

/// Decodes `bytes` with the named encoding label; unknown labels and
/// missing labels mean UTF-8.
pub fn decode_bytes(bytes: &[u8], label: Option<&str>) -> String {
    if let Some(label) = label {
        if let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) {
            let (text, _, _) = encoding.decode(bytes);
            return text.into_owned();
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

pub enum FetchOutcome {
    NotModified,
    Fetched(Page),
}

pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("failed to build http client");
        Fetcher { client }
    }

    /// Conditional GET for feed refreshes. A 304 comes back as
    /// `NotModified` rather than as a body.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        state: Option<&HttpState>,
    ) -> AppResult<FetchOutcome> {
        let mut request = FetchRequest::get(url);
        request.headers.extend_from_slice(headers);
        if let Some(state) = state {
            if let Some(last_modified) = &state.last_modified {
                request
                    .headers
                    .push((IF_MODIFIED_SINCE.as_str().to_string(), last_modified.clone()));
            }
            if let Some(etag) = &state.etag {
                request
                    .headers
                    .push((IF_NONE_MATCH.as_str().to_string(), etag.clone()));
            }
        }

        let page = self.execute(&request).await?;
        if page.status == StatusCode::NOT_MODIFIED.as_u16() {
            return Ok(FetchOutcome::NotModified);
        }
        Ok(FetchOutcome::Fetched(page))
    }

    /// Issues the request with the shared retry policy. Every attempt
    /// carries the desktop User-Agent and a Referer derived from the
    /// request's scheme and host.
    pub async fn execute(&self, request: &FetchRequest) -> AppResult<Page> {
        let url = Url::parse(&request.url)
            .map_err(|err| AppError::BadRequest(format!("{}: {err}", request.url)))?;
        let referer = origin_of(&url);

        let mut last_error = AppError::Transport(format!("GET \"{url}\": no attempts made"));
        for attempt in 1..=MAX_TRY {
            let mut builder = self
                .client
                .request(request.method.clone(), url.clone())
                .header(reqwest::header::USER_AGENT, util::USER_AGENT);
            if let Some(referer) = &referer {
                builder = builder.header(reqwest::header::REFERER, referer.clone());
            }
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if is_error_response(status) {
                        last_error = AppError::Transport(format!(
                            "{} \"{}\": {}",
                            request.method, request.url, status
                        ));
                        if !is_retryable(status) {
                            return Err(last_error);
                        }
                    } else {
                        let final_url = response.url().to_string();
                        let headers = flatten_headers(response.headers());
                        match response.bytes().await {
                            Ok(bytes) => {
                                return Ok(Page {
                                    url: final_url,
                                    status: status.as_u16(),
                                    headers,
                                    bytes: bytes.to_vec(),
                                })
                            }
                            Err(err) => last_error = err.into(),
                        }
                    }
                }
                Err(err) => last_error = err.into(),
            }
            if attempt < MAX_TRY {
                log::info!("{last_error}, retry attempt {attempt}");
            }
        }
        Err(last_error)
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn origin_of(url: &Url) -> Option<String> {
    url.host_str()
        .map(|host| format!("{}://{}", url.scheme(), host))
}

fn flatten_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(key, value)| {
            (
                key.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_extracts_the_charset_parameter() {
        let page = Page {
            url: String::new(),
            status: 200,
            headers: vec![(
                "content-type".into(),
                "text/html; charset=\"ISO-8859-1\"".into(),
            )],
            bytes: vec![0xE9],
        };
        assert_eq!(page.text(), "é");
    }

    #[test]
    fn it_falls_back_to_utf8() {
        let page = Page {
            url: String::new(),
            status: 200,
            headers: vec![],
            bytes: "héllo".as_bytes().to_vec(),
        };
        assert_eq!(page.text(), "héllo");
    }

    #[test]
    fn retryable_statuses_match_the_fixed_set() {
        for status in [408u16, 409, 425, 429, 500, 502, 503, 504] {
            assert!(is_retryable(StatusCode::from_u16(status).unwrap()));
        }
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::GONE));
    }
}
