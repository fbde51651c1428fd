// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the blog API: formats, throttling and uploads.

mod harness;

use axum::{
    body::Body,
    http::{header, Method, StatusCode},
};
use harness::{from_peer, multipart, request, seed, TestApp, PNG};
use serde_json::json;

#[tokio::test]
async fn test_version() {
    let app = TestApp::new();

    let response = app.get("/api/v1/status").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), json!({"version": "v1"}));
}

#[tokio::test]
async fn test_format_xml() {
    let app = TestApp::new();
    seed(app.store()).await;

    let response = app.get("/api/v1/entries?format=xml").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.content_type().starts_with("application/xml"));

    let xml = response.text();
    assert!(xml.starts_with(r#"<?xml version="1.0" encoding="utf-8"?>"#));
    assert!(xml.contains("<count>2</count>"));
    assert!(xml.contains("<next></next>"));
    assert!(xml.contains("<scoring>2.04</scoring>"));
    assert!(xml.contains(
        "<users><list-item>http://testserver/api/v1/users/1?format=xml</list-item></users>"
    ));
}

#[tokio::test]
async fn test_format_json() {
    let app = TestApp::new();
    seed(app.store()).await;

    let expected = json!({
        "count": 2,
        "next": null,
        "previous": null,
        "results": [
            {
                "url": "http://testserver/api/v1/entries/1?format=json",
                "blog": "http://testserver/api/v1/blogs/1?format=json",
                "users": ["http://testserver/api/v1/users/1?format=json"],
                "headline": "Some headline",
                "body_text": "Some body text",
                "image": null,
                "number_comments": 10,
                "scoring": "2.04",
                "pub_date": "2016-01-15",
                "mod_date": "2016-09-20"
            },
            {
                "url": "http://testserver/api/v1/entries/2?format=json",
                "blog": "http://testserver/api/v1/blogs/1?format=json",
                "users": [],
                "headline": "Some headline",
                "body_text": "Some body text",
                "image": null,
                "number_comments": 20,
                "scoring": "4.25",
                "pub_date": "2016-01-15",
                "mod_date": "2016-09-20"
            }
        ]
    });

    let response = app.get("/api/v1/entries?format=json").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type(), "application/json");
    assert_eq!(response.json(), expected);
}

#[tokio::test]
async fn test_format_json_default() {
    let app = TestApp::new();
    seed(app.store()).await;

    let response = app.get("/api/v1/entries").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_type(), "application/json");
    // Links carry no format when none was asked for
    assert_eq!(
        response.json()["results"][0]["url"],
        "http://testserver/api/v1/entries/1"
    );
}

#[tokio::test]
async fn test_accept_header_selects_xml() {
    let app = TestApp::new();

    let response = app
        .send(
            request(Method::GET, "/api/v1/blogs")
                .header(header::ACCEPT, "application/xml")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text().starts_with("<?xml"));
}

#[tokio::test]
async fn test_unknown_format_is_not_acceptable() {
    let app = TestApp::new();
    seed(app.store()).await;

    let response = app.get("/api/v1/entries?format=yaml").await;
    assert_eq!(response.status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(response.content_type(), "application/json");
    assert!(response.json()["detail"].as_str().unwrap().contains("yaml"));
}

#[tokio::test]
async fn test_throttling() {
    let app = TestApp::new();
    seed(app.store()).await;

    for i in 0..50 {
        let response = app.get("/api/v1/entries").await;
        assert_eq!(response.status, StatusCode::OK, "request {} should pass", i + 1);
    }

    let response = app.get("/api/v1/entries").await;
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.json(), json!({"detail": "Request was throttled."}));
    assert!(response.headers.contains_key(header::RETRY_AFTER));

    // The status endpoint is never throttled
    let response = app.get("/api/v1/status").await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_throttled_error_follows_requested_format() {
    let mut config = blog_api::Config::default();
    config.throttle.anon_rate = 1;
    let app = TestApp::with_config(config);

    assert_eq!(app.get("/api/v1/blogs").await.status, StatusCode::OK);

    let response = app.get("/api/v1/blogs?format=xml").await;
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(response
        .text()
        .contains("<detail>Request was throttled.</detail>"));
}

#[tokio::test]
async fn test_throttling_is_per_identity() {
    let mut config = blog_api::Config::default();
    config.throttle.anon_rate = 2;
    config.throttle.user_rate = 2;
    let app = TestApp::with_config(config);
    seed(app.store()).await;

    let from = |peer: &str| {
        from_peer(Method::GET, "/api/v1/blogs", peer)
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        assert_eq!(app.send(from("10.0.0.1:40000")).await.status, StatusCode::OK);
    }
    // Same address, new connection: same bucket
    assert_eq!(
        app.send(from("10.0.0.1:40001")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(app.send(from("10.0.0.2:40000")).await.status, StatusCode::OK);

    // An authenticated caller has its own window even from a throttled address
    let token = format!("AccessKey {}:{}", "a".repeat(32), "b".repeat(32));
    let response = app
        .send(
            from_peer(Method::GET, "/api/v1/blogs", "10.0.0.1:40000")
                .header(header::AUTHORIZATION, token)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_forwarded_for_does_not_reset_the_window() {
    let app = TestApp::new();

    for i in 0..50 {
        let response = app
            .send(
                from_peer(Method::GET, "/api/v1/blogs", "198.51.100.7:5000")
                    .header("x-forwarded-for", format!("203.0.113.{i}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "request {} should pass", i + 1);
    }

    let response = app
        .send(
            from_peer(Method::GET, "/api/v1/blogs", "198.51.100.7:5000")
                .header("x-forwarded-for", "203.0.113.200")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_trusted_proxy_forwards_the_client_address() {
    let mut config = blog_api::Config::default();
    config.throttle.anon_rate = 1;
    config.auth.trusted_proxies = vec!["10.0.0.1".parse().unwrap()];
    let app = TestApp::with_config(config);

    let via_proxy = |client: &str| {
        from_peer(Method::GET, "/api/v1/blogs", "10.0.0.1:443")
            .header("x-forwarded-for", client)
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(app.send(via_proxy("203.0.113.1")).await.status, StatusCode::OK);
    assert_eq!(
        app.send(via_proxy("203.0.113.1")).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(app.send(via_proxy("203.0.113.2")).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_entry_image_upload() {
    let app = TestApp::new();
    seed(app.store()).await;
    assert_eq!(app.store().entries.list().await.unwrap().len(), 2);

    let (content_type, body) = multipart(
        &[
            ("blog", "http://testserver/api/v1/blogs/1"),
            ("users", "http://testserver/api/v1/users/1"),
            ("headline", "New entry"),
            ("body_text", "Some body text"),
            ("number_comments", "15"),
            ("scoring", "4.25"),
        ],
        Some(("image", "python-logo.png", PNG)),
    );
    let response = app
        .send(
            request(Method::POST, "/api/v1/entries")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());

    let entries = app.store().entries.list().await.unwrap();
    assert_eq!(entries.len(), 3);
    let entry = entries
        .iter()
        .find(|entry| entry.headline == "New entry")
        .unwrap();
    let image = entry.image.as_deref().unwrap();
    assert!(image.starts_with("/media/images/python-logo"));
    assert_eq!(response.json()["image"], image);

    // The stored file is served back under the media prefix
    let served = app.get(image).await;
    assert_eq!(served.status, StatusCode::OK);
    assert_eq!(&served.body[..], PNG);
}

#[tokio::test]
async fn test_image_upload_rejects_non_images() {
    let app = TestApp::new();
    seed(app.store()).await;

    let (content_type, body) = multipart(
        &[
            ("blog", "1"),
            ("headline", "New entry"),
            ("body_text", "Some body text"),
            ("number_comments", "1"),
            ("scoring", "1"),
        ],
        Some(("image", "notes.png", b"plain text".as_slice())),
    );
    let response = app
        .send(
            request(Method::POST, "/api/v1/entries")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.json()["image"].is_array());
    assert_eq!(app.store().entries.list().await.unwrap().len(), 2);
}
