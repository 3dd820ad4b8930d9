//! HTTP transport for feed requests.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Request, Response, StatusCode, Url};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::FeedError;

pub fn parse_url(url: &str) -> Result<Url, FeedError> {
    Url::parse(url).map_err(|e| FeedError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Converts configured headers into a [`HeaderMap`], rejecting any name or
/// value that is not valid HTTP.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, FeedError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let invalid = || FeedError::InvalidHeader { name: name.clone() };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Issues a GET for `url` with `headers` and returns the response if it
/// carries usable data.
///
/// Only `200 OK` carries a feed body. Any other status, including `204 No
/// Content`, `206 Partial Content` and `304 Not Modified`, is `Ok(None)`.
/// Network failures are returned as errors. Nothing is retried.
pub async fn open_stream<C: HttpClient + ?Sized>(
    client: &C,
    url: &Url,
    headers: &HeaderMap,
) -> Result<Option<Response>, FeedError> {
    let mut req = Request::new(Method::GET, url.clone());
    *req.headers_mut() = headers.clone();

    let resp = client.execute(req).await?;
    let status = resp.status();
    if status != StatusCode::OK {
        debug!(url = %url, status = status.as_u16(), "Feed response carries no data");
        return Ok(None);
    }

    Ok(Some(resp))
}

/// Reads the whole body of `resp`. An empty body counts as no data.
///
/// The response is consumed here, so the connection is released whether
/// the read succeeds or fails part way.
pub async fn read_body(resp: Response) -> Result<Option<Bytes>, FeedError> {
    let body = resp.bytes().await?;
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(body))
}

/// Convenience wrapper over [`open_stream`] and [`read_body`].
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &Url,
    headers: &HeaderMap,
) -> Result<Option<Bytes>, FeedError> {
    match open_stream(client, url, headers).await? {
        Some(resp) => read_body(resp).await,
        None => Ok(None),
    }
}
