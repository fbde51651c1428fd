// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Content negotiation and response encoding.
//!
//! Entities are first encoded into a neutral document tree by explicit
//! per-entity functions; the selected [`RenderFormat`] then decides how that
//! tree is written out.

use crate::error::{ApiError, Result};
use crate::links::Links;
use crate::models::{Blog, Entry, Kind, Resource, User};
use crate::paginator::Page;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};
use serde_json::{json, Value};
use tracing::error;

/// Output encoding for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    Json,
    Xml,
}

impl RenderFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml; charset=utf-8",
        }
    }

    /// Parse an explicit `format` parameter.
    pub fn from_param(value: &str) -> Result<Self> {
        match value {
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            other => Err(ApiError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Pick the response format.
///
/// An explicit `format` parameter always wins. Otherwise `Accept` is
/// consulted, and JSON is chosen unless XML is strictly preferred.
pub fn select(format: Option<&str>, accept: Option<&str>) -> Result<RenderFormat> {
    if let Some(format) = format {
        return RenderFormat::from_param(format);
    }

    let accept = match accept.map(str::trim) {
        None | Some("") => return Ok(RenderFormat::Json),
        Some(accept) => accept,
    };

    let json_q = quality(accept, &["application/json"]);
    let xml_q = quality(accept, &["application/xml", "text/xml"]);

    match (json_q, xml_q) {
        (None, None) => Err(ApiError::UnsupportedFormat(accept.to_string())),
        (json_q, Some(xml_q)) if xml_q > json_q.unwrap_or(0.0) => Ok(RenderFormat::Xml),
        (Some(json_q), _) if json_q > 0.0 => Ok(RenderFormat::Json),
        (_, Some(xml_q)) if xml_q > 0.0 => Ok(RenderFormat::Xml),
        _ => Err(ApiError::UnsupportedFormat(accept.to_string())),
    }
}

/// Quality the `Accept` header gives to any of `candidates`, taking the
/// most specific matching range for each.
fn quality(accept: &str, candidates: &[&str]) -> Option<f32> {
    let mut best: Option<(u8, f32)> = None;

    for range in accept.split(',') {
        let mut parts = range.split(';');
        let media = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let q = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);

        for candidate in candidates {
            let major = candidate.split('/').next().unwrap_or("");
            let specificity = if media == *candidate {
                3
            } else if media == format!("{major}/*") {
                2
            } else if media == "*/*" {
                1
            } else {
                continue;
            };

            best = match best {
                Some((s, bq)) if s > specificity || (s == specificity && bq >= q) => {
                    Some((s, bq))
                }
                _ => Some((specificity, q)),
            };
        }
    }

    best.map(|(_, q)| q)
}

/// Encode a user. `secretkey` is never exposed.
pub fn encode_user(user: &User, links: &Links) -> Value {
    json!({
        "url": links.resource(Kind::User, user.id),
        "username": user.username,
        "first_name": user.first_name,
        "last_name": user.last_name,
        "email": user.email,
        "accesskey": user.accesskey,
    })
}

pub fn encode_blog(blog: &Blog, links: &Links) -> Value {
    json!({
        "url": links.resource(Kind::Blog, blog.id),
        "name": blog.name,
        "tagline": blog.tagline,
    })
}

pub fn encode_entry(entry: &Entry, links: &Links) -> Value {
    let users: Vec<String> = entry
        .users
        .iter()
        .map(|id| links.resource(Kind::User, *id))
        .collect();

    json!({
        "url": links.resource(Kind::Entry, entry.id),
        "blog": links.resource(Kind::Blog, entry.blog),
        "users": users,
        "headline": entry.headline,
        "body_text": entry.body_text,
        "image": entry.image,
        "number_comments": entry.number_comments,
        "scoring": entry.scoring.to_string(),
        "pub_date": entry.pub_date.format("%Y-%m-%d").to_string(),
        "mod_date": entry.mod_date.format("%Y-%m-%d").to_string(),
    })
}

pub fn encode(resource: &Resource, links: &Links) -> Value {
    match resource {
        Resource::User(user) => encode_user(user, links),
        Resource::Blog(blog) => encode_blog(blog, links),
        Resource::Entry(entry) => encode_entry(entry, links),
    }
}

pub fn encode_page(page: &Page<Resource>, links: &Links) -> Value {
    let results: Vec<Value> = page.results.iter().map(|r| encode(r, links)).collect();
    json!({
        "count": page.count,
        "next": page.next,
        "previous": page.previous,
        "results": results,
    })
}

/// Serialize a document in the given format.
pub fn to_bytes(document: &Value, format: RenderFormat) -> std::result::Result<Vec<u8>, String> {
    match format {
        RenderFormat::Json => serde_json::to_vec(document).map_err(|e| e.to_string()),
        RenderFormat::Xml => to_xml(document),
    }
}

fn to_xml(document: &Value) -> std::result::Result<Vec<u8>, String> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(|e| e.to_string())?;
    writer.get_mut().push(b'\n');
    write_element(&mut writer, "root", document)?;
    Ok(writer.into_inner())
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &Value,
) -> std::result::Result<(), String> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| e.to_string())?;

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                write_element(writer, key, child)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                write_element(writer, "list-item", item)?;
            }
        }
        Value::Null => {}
        Value::String(text) => write_text(writer, text)?,
        Value::Bool(flag) => write_text(writer, if *flag { "True" } else { "False" })?,
        Value::Number(number) => write_text(writer, &number.to_string())?,
    }

    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| e.to_string())
}

fn write_text(writer: &mut Writer<Vec<u8>>, text: &str) -> std::result::Result<(), String> {
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(|e| e.to_string())
}

/// Build an HTTP response carrying `document` in `format`.
pub fn respond(status: StatusCode, document: &Value, format: RenderFormat) -> Response {
    match to_bytes(document, format) {
        Ok(bytes) => {
            let mut response = (status, Body::from(bytes)).into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(format.content_type()),
            );
            response
        }
        Err(reason) => {
            error!(%reason, ?format, "Failed to encode response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
