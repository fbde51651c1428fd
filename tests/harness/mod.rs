// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test harness for driving the blog API through its router.
//!
//! Requests go through `tower::ServiceExt::oneshot`, so every test exercises
//! the same routing, pipeline and rendering the server uses.

#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::ConnectInfo,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use blog_api::{
    config::Config,
    handlers::{router, AppState},
    limiter::RateLimiter,
    media::MediaStore,
    metrics::Metrics,
    models::{Blog, Entry, Scoring, User},
    pipeline::Pipeline,
    store::ResourceStore,
};
use chrono::NaiveDate;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Host every harness request claims, so links are predictable.
pub const HOST: &str = "testserver";

/// Smallest file the media store accepts as a PNG.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01";

const BOUNDARY: &str = "blog-api-test-boundary";

/// A router over fresh state, with media written to a temporary directory.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub media: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_store(config, ResourceStore::in_memory())
    }

    /// Like [`with_config`](Self::with_config), over a caller-built store.
    pub fn with_store(mut config: Config, store: ResourceStore) -> Self {
        let media = tempfile::tempdir().expect("temp media dir");
        config.media.root = media.path().to_path_buf();

        let pipeline = Pipeline::new(
            config.clone(),
            store,
            RateLimiter::new(config.throttle.clone()),
            MediaStore::new(&config.media),
            Metrics::new().expect("metrics registry"),
        );
        let state = Arc::new(AppState { pipeline, config });

        Self {
            router: router(state.clone()),
            state,
            media,
        }
    }

    /// A config whose limiter never gets in the way.
    pub fn unthrottled() -> Self {
        let mut config = Config::default();
        config.throttle.anon_rate = 10_000;
        config.throttle.user_rate = 10_000;
        Self::with_config(config)
    }

    pub fn store(&self) -> &ResourceStore {
        self.state.pipeline.store()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(request(Method::GET, uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn send_json(&self, method: Method, uri: &str, body: Value) -> TestResponse {
        self.send(
            request(method, uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        self.send(request(Method::DELETE, uri).body(Body::empty()).unwrap())
            .await
    }
}

/// Request builder preloaded with the harness host.
pub fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, HOST)
}

/// Request builder whose connection comes from `peer`.
pub fn from_peer(method: Method, uri: &str, peer: &str) -> axum::http::request::Builder {
    let addr: SocketAddr = peer.parse().expect("socket address");
    request(method, uri).extension(ConnectInfo(addr))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("JSON body")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// Records created by [`seed`].
pub struct Seed {
    pub blog: Blog,
    pub user: User,
    pub entries: Vec<Entry>,
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// One blog, one user and two entries; the first entry is authored by the
/// user.
pub async fn seed(store: &ResourceStore) -> Seed {
    let blog = store
        .blogs
        .create(Blog {
            name: "Engineering".into(),
            tagline: "Notes from the team".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let user = store
        .users
        .create(User {
            username: "larrypage".into(),
            first_name: "Larry".into(),
            last_name: "Page".into(),
            email: "lpage@google.com".into(),
            accesskey: "a".repeat(32),
            secretkey: "b".repeat(32),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut entries = Vec::new();
    for (scoring, comments, users) in [(204, 10, vec![user.id]), (425, 20, vec![])] {
        let mut entry = Entry::dated(date(2016, 1, 15));
        entry.blog = blog.id;
        entry.users = users;
        entry.headline = "Some headline".into();
        entry.body_text = "Some body text".into();
        entry.number_comments = comments;
        entry.scoring = Scoring::from_hundredths(scoring);
        entry.mod_date = date(2016, 9, 20);
        entries.push(store.entries.create(entry).await.unwrap());
    }

    Seed {
        blog,
        user,
        entries,
    }
}

/// Encode a `multipart/form-data` body. Returns the content type and body.
pub fn multipart(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((name, filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}
