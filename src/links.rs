// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Absolute hyperlinks for rendered resources.
//!
//! Links are built from the request's own host and scheme. A `format`
//! query parameter on the request is carried into every resource link so
//! that a client browsing in XML keeps getting XML.

use crate::models::Kind;
use axum::http::{header, uri::Uri, HeaderMap};
use url::Url;

/// Versioned API mount point.
pub const API_PREFIX: &str = "/api/v1";

/// Link builder for one request.
#[derive(Debug, Clone)]
pub struct Links {
    base: Url,
    request: Url,
    format: Option<String>,
}

impl Links {
    /// Build links for a request with the given URI and headers.
    pub fn from_request(uri: &Uri, headers: &HeaderMap) -> Self {
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get(header::HOST))
            .and_then(|v| v.to_str().ok())
            .or_else(|| uri.authority().map(|a| a.as_str()))
            .unwrap_or("localhost");
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .filter(|proto| matches!(*proto, "http" | "https"))
            .or_else(|| uri.scheme_str())
            .unwrap_or("http");

        let base = Url::parse(&format!("{scheme}://{host}"))
            .or_else(|_| Url::parse("http://localhost"))
            .expect("static fallback URL parses");
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let request = base.join(path_and_query).unwrap_or_else(|_| base.clone());

        let format = request
            .query_pairs()
            .find(|(key, _)| key == "format")
            .map(|(_, value)| value.into_owned());

        Self {
            base,
            request,
            format,
        }
    }

    /// The `format` parameter the request carried, if any.
    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// First value of a query parameter on the request.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.request
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    fn api_url(&self, path: &str) -> String {
        let mut url = self.base.clone();
        url.set_path(&format!("{API_PREFIX}{path}"));
        if let Some(format) = &self.format {
            url.query_pairs_mut().append_pair("format", format);
        }
        url.to_string()
    }

    /// Link to a single resource, e.g. `http://host/api/v1/entries/1`.
    pub fn resource(&self, kind: Kind, id: u64) -> String {
        self.api_url(&format!("/{}/{}", kind.segment(), id))
    }

    /// Link to a collection, e.g. `http://host/api/v1/entries`.
    pub fn collection(&self, kind: Kind) -> String {
        self.api_url(&format!("/{}", kind.segment()))
    }

    /// The request URL with `page` replaced. Page 1 drops the parameter.
    pub fn page(&self, number: usize) -> String {
        let mut url = self.request.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "page")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        url.set_query(None);
        if !kept.is_empty() || number > 1 {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &kept {
                pairs.append_pair(key, value);
            }
            if number > 1 {
                pairs.append_pair("page", &number.to_string());
            }
        }
        url.to_string()
    }
}

/// Resolve a reference to `kind`: a hyperlink (absolute or path-only) to
/// the resource, or a bare primary key.
pub fn parse_ref(kind: Kind, raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<u64>() {
        return (id > 0).then_some(id);
    }

    let path = match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) if raw.starts_with('/') => raw.split(['?', '#']).next()?.to_string(),
        Err(_) => return None,
    };

    let rest = path.trim_end_matches('/').strip_prefix(API_PREFIX)?;
    let id = rest
        .strip_prefix('/')?
        .strip_prefix(kind.segment())?
        .strip_prefix('/')?;
    id.parse::<u64>().ok().filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn links(uri: &str) -> Links {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("testserver"));
        Links::from_request(&uri.parse().unwrap(), &headers)
    }

    #[test]
    fn test_resource_links_carry_format() {
        let l = links("/api/v1/entries?format=json");
        assert_eq!(
            l.resource(Kind::Blog, 1),
            "http://testserver/api/v1/blogs/1?format=json"
        );
        assert_eq!(l.format(), Some("json"));

        let plain = links("/api/v1/entries");
        assert_eq!(
            plain.resource(Kind::User, 1),
            "http://testserver/api/v1/users/1"
        );
        assert_eq!(plain.collection(Kind::Entry), "http://testserver/api/v1/entries");
    }

    #[test]
    fn test_page_links() {
        let l = links("/api/v1/entries?format=xml&page=2");
        assert_eq!(l.page(3), "http://testserver/api/v1/entries?format=xml&page=3");
        assert_eq!(l.page(1), "http://testserver/api/v1/entries?format=xml");

        let bare = links("/api/v1/entries");
        assert_eq!(bare.page(1), "http://testserver/api/v1/entries");
        assert_eq!(bare.page(2), "http://testserver/api/v1/entries?page=2");
    }

    #[test]
    fn test_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("internal:8080"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("blog.example.com"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let l = Links::from_request(&"/api/v1/blogs".parse().unwrap(), &headers);
        assert_eq!(l.resource(Kind::Blog, 2), "https://blog.example.com/api/v1/blogs/2");
    }

    #[test]
    fn test_parse_ref() {
        assert_eq!(parse_ref(Kind::Blog, "http://testserver/api/v1/blogs/1"), Some(1));
        assert_eq!(parse_ref(Kind::Blog, "http://testserver/api/v1/blogs/1?format=json"), Some(1));
        assert_eq!(parse_ref(Kind::User, "/api/v1/users/12/"), Some(12));
        assert_eq!(parse_ref(Kind::User, "7"), Some(7));
        assert_eq!(parse_ref(Kind::User, "0"), None);
        assert_eq!(parse_ref(Kind::Blog, "http://testserver/api/v1/users/1"), None);
        assert_eq!(parse_ref(Kind::Blog, "http://testserver/api/v1/blogs/x"), None);
        assert_eq!(parse_ref(Kind::Blog, "blogs/1"), None);
    }
}
