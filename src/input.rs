// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request bodies as a flat, multi-valued field set.
//!
//! JSON objects, url-encoded forms and multipart forms all decode into a
//! [`FieldSet`], so entity validation never cares how a client chose to
//! send its data.

use crate::error::{ApiError, Result};
use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::header,
};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Uploaded file part.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// One submitted value.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Text(String),
    File(Upload),
    Null,
}

/// Submitted fields in arrival order. A name may repeat.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    values: Vec<(String, FieldValue)>,
    present: HashSet<String>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a field as submitted without adding a value (e.g. `"users": []`).
    pub fn touch(&mut self, name: &str) {
        self.present.insert(name.to_string());
    }

    pub fn push(&mut self, name: &str, value: FieldValue) {
        self.touch(name);
        self.values.push((name.to_string(), value));
    }

    pub fn push_text(&mut self, name: &str, value: impl Into<String>) {
        self.push(name, FieldValue::Text(value.into()));
    }

    /// Whether the client submitted this field at all.
    pub fn contains(&self, name: &str) -> bool {
        self.present.contains(name)
    }

    fn all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        let name = name.to_owned();
        self.values
            .iter()
            .filter(move |(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// First value of a field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.all(name).next()
    }

    /// First text value of a field. Null reads as empty.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Text(text) => Some(text.as_str()),
            FieldValue::Null => Some(""),
            FieldValue::File(upload) => Some(upload.filename.as_str()),
        }
    }

    /// Every text value of a repeated field.
    pub fn texts(&self, name: &str) -> Vec<&str> {
        self.all(name)
            .filter_map(|value| match value {
                FieldValue::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Decode a JSON document. Only a top-level object is accepted.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let document: Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("JSON parse error - {e}")))?;

        let Value::Object(object) = document else {
            return Err(ApiError::BadRequest(
                "Expected a JSON object at the top level.".to_string(),
            ));
        };

        let mut fields = Self::new();
        for (name, value) in object {
            match value {
                Value::Array(items) => {
                    fields.touch(&name);
                    for item in items {
                        fields.push(&name, scalar(&name, item)?);
                    }
                }
                other => fields.push(&name, scalar(&name, other)?),
            }
        }
        Ok(fields)
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    pub fn from_urlencoded(body: &[u8]) -> Self {
        let mut fields = Self::new();
        for (name, value) in url::form_urlencoded::parse(body) {
            fields.push_text(&name, value.into_owned());
        }
        fields
    }

    /// Decode a `multipart/form-data` stream.
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self> {
        let mut fields = Self::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Multipart form parse error - {e}")))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(|e| {
                        ApiError::BadRequest(format!("Multipart form parse error - {e}"))
                    })?;
                    debug!(field = %name, %filename, size = bytes.len(), "Received file part");
                    fields.push(
                        &name,
                        FieldValue::File(Upload {
                            filename,
                            content_type,
                            bytes,
                        }),
                    );
                }
                None => {
                    let text = field.text().await.map_err(|e| {
                        ApiError::BadRequest(format!("Multipart form parse error - {e}"))
                    })?;
                    fields.push_text(&name, text);
                }
            }
        }
        Ok(fields)
    }

    /// Read a request body, dispatching on its `Content-Type`.
    pub async fn from_request(request: Request, limit: usize) -> Result<Self> {
        let media_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .unwrap_or_default();

        match media_type.as_str() {
            "multipart/form-data" => {
                let multipart = Multipart::from_request(request, &())
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                Self::from_multipart(multipart).await
            }
            "application/x-www-form-urlencoded" => {
                let body = read_body(request, limit).await?;
                Ok(Self::from_urlencoded(&body))
            }
            "" | "application/json" => {
                let body = read_body(request, limit).await?;
                if body.iter().all(u8::is_ascii_whitespace) {
                    return Ok(Self::new());
                }
                Self::from_json(&body)
            }
            other => Err(ApiError::BadRequest(format!(
                "Unsupported media type \"{other}\" in request."
            ))),
        }
    }
}

async fn read_body(request: Request, limit: usize) -> Result<Bytes> {
    axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Could not read request body - {e}")))
}

fn scalar(name: &str, value: Value) -> Result<FieldValue> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::String(text) => Ok(FieldValue::Text(text)),
        Value::Number(number) => Ok(FieldValue::Text(number.to_string())),
        Value::Bool(flag) => Ok(FieldValue::Text(flag.to_string())),
        Value::Array(_) | Value::Object(_) => Err(ApiError::invalid(
            name,
            "Nested structures are not supported for this field.",
        )),
    }
}
