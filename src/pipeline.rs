// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request pipeline.
//!
//! Every API request runs the same stages in order, stopping at the first
//! failure:
//!
//! 1. **Identify**: credentials to [`ClientIdentity`]
//! 2. **RateCheck**: fixed-window admission
//! 3. **Dispatch**: CRUD against the resource store, under a time budget
//! 4. **Paginate**: list operations only
//! 5. **Select format**: JSON or XML
//! 6. **Render**
//!
//! Writes negotiate their format before Dispatch so an unacceptable format
//! is refused before anything is stored. Whatever happens, the request ends
//! in exactly one rendered response.

use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::identity::{anonymous_origin, ClientIdentity, Credentials};
use crate::input::{FieldSet, FieldValue};
use crate::limiter::{Decision, RateLimiter};
use crate::links::Links;
use crate::media::MediaStore;
use crate::metrics::Metrics;
use crate::models::{Blog, Changeset, Entry, Kind, Resource, User};
use crate::paginator::{paginate, Page, PageRequest};
use crate::render::{self, RenderFormat};
use crate::store::{ResourceStore, StoreResult};
use axum::{
    extract::{ConnectInfo, Request},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// API version reported by the status endpoint.
pub const API_VERSION: &str = "v1";

/// Request metadata the pipeline needs, detached from the body.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub headers: HeaderMap,
    pub links: Links,
    pub peer: Option<SocketAddr>,
}

impl RequestContext {
    pub fn from_parts(parts: &Parts) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            method: parts.method.clone(),
            headers: parts.headers.clone(),
            links: Links::from_request(&parts.uri, &parts.headers),
            peer,
        }
    }

    fn accept(&self) -> Option<&str> {
        self.headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
    }

    /// Format the request asks for.
    pub fn requested_format(&self) -> Result<RenderFormat> {
        render::select(self.links.format(), self.accept())
    }
}

/// What the client asked the API to do.
#[derive(Debug)]
pub enum Operation {
    Root,
    List(Kind),
    Retrieve(Kind, u64),
    Create(Kind, Request),
    Update {
        kind: Kind,
        id: u64,
        body: Request,
        partial: bool,
    },
    Delete(Kind, u64),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::List(_) => "list",
            Self::Retrieve(..) => "retrieve",
            Self::Create(..) => "create",
            Self::Update { partial: false, .. } => "update",
            Self::Update { partial: true, .. } => "partial_update",
            Self::Delete(..) => "delete",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Create(..) | Self::Update { .. } | Self::Delete(..)
        )
    }
}

/// Result of the dispatch stage.
enum Dispatched {
    Root,
    One(StatusCode, Resource),
    Many(Vec<Resource>),
    Deleted,
}

/// Dispatch result after pagination.
enum Payload {
    Root,
    One(StatusCode, Resource),
    Page(Page<Resource>),
    Deleted,
}

/// The request pipeline and the collaborators it composes.
pub struct Pipeline {
    config: Config,
    store: ResourceStore,
    limiter: RateLimiter,
    media: MediaStore,
    metrics: Metrics,
}

impl Pipeline {
    pub fn new(
        config: Config,
        store: ResourceStore,
        limiter: RateLimiter,
        media: MediaStore,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            store,
            limiter,
            media,
            metrics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run one request through every stage and render the outcome.
    pub async fn handle(&self, ctx: RequestContext, op: Operation) -> Response {
        let operation = op.name();
        let span = info_span!("request", method = %ctx.method, operation);

        async move {
            match self.run(&ctx, op).await {
                Ok(response) => {
                    self.metrics.observe(operation, "ok");
                    info!(status = response.status().as_u16(), "Request served");
                    response
                }
                Err(err) => self.fail(&ctx, operation, err),
            }
        }
        .instrument(span)
        .await
    }

    /// `GET /status`: version only, never throttled or paginated.
    pub fn status(&self, ctx: &RequestContext) -> Response {
        match ctx.requested_format() {
            Ok(format) => {
                self.metrics.observe("status", "ok");
                render::respond(StatusCode::OK, &json!({"version": API_VERSION}), format)
            }
            Err(err) => self.fail(ctx, "status", err),
        }
    }

    /// Render an error for a request that never reached the stages.
    pub fn reject(&self, ctx: &RequestContext, err: ApiError) -> Response {
        self.fail(ctx, "unrouted", err)
    }

    /// Render `err` in the requested format, or JSON if that is the problem.
    fn fail(&self, ctx: &RequestContext, operation: &'static str, err: ApiError) -> Response {
        self.metrics.observe(operation, err.code());
        if err.is_retryable() {
            warn!(operation, error = %err, "Request failed on the resource store");
        } else {
            info!(operation, code = err.code(), status = err.status().as_u16(), "Request rejected");
        }

        let format = ctx.requested_format().unwrap_or(RenderFormat::Json);
        let mut response = render::respond(err.status(), &err.body(), format);

        if let ApiError::Throttled { retry_after } = &err {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(*retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }

    async fn run(&self, ctx: &RequestContext, op: Operation) -> Result<Response> {
        let mutating = op.is_mutating();

        // Stage 1: identify
        let identity = self.identify(ctx, mutating).await?;
        debug!(%identity, "Identified caller");

        // Stage 2: rate check
        let remaining = match self.limiter.admit(&identity) {
            Decision::Allow { remaining, .. } => remaining,
            Decision::Deny { retry_after } => {
                info!(%identity, ?retry_after, "Request throttled");
                return Err(ApiError::Throttled { retry_after });
            }
        };

        let negotiated = if mutating {
            Some(ctx.requested_format()?)
        } else {
            None
        };

        // Stage 3: dispatch
        let dispatched = self.dispatch(op).await?;

        // Stage 4: paginate
        let payload = match dispatched {
            Dispatched::Many(items) => {
                let request = PageRequest::from_params(
                    ctx.links.query_param("page").as_deref(),
                    ctx.links.query_param("page_size").as_deref(),
                    &self.config.pagination,
                )?;
                let page = paginate(items, &request, |n| ctx.links.page(n))?;
                debug!(count = page.count, page = page.number, "Paginated");
                Payload::Page(page)
            }
            Dispatched::One(status, resource) => Payload::One(status, resource),
            Dispatched::Root => Payload::Root,
            Dispatched::Deleted => Payload::Deleted,
        };

        // Stage 5: select format
        let format = match negotiated {
            Some(format) => format,
            None => ctx.requested_format()?,
        };

        // Stage 6: render
        let mut response = match payload {
            Payload::Root => {
                let document = json!({
                    "users": ctx.links.collection(Kind::User),
                    "entries": ctx.links.collection(Kind::Entry),
                    "blogs": ctx.links.collection(Kind::Blog),
                });
                render::respond(StatusCode::OK, &document, format)
            }
            Payload::One(status, resource) => {
                render::respond(status, &render::encode(&resource, &ctx.links), format)
            }
            Payload::Page(page) => {
                render::respond(StatusCode::OK, &render::encode_page(&page, &ctx.links), format)
            }
            Payload::Deleted => StatusCode::NO_CONTENT.into_response(),
        };

        if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
            response.headers_mut().insert("x-ratelimit-remaining", value);
        }
        Ok(response)
    }

    async fn identify(&self, ctx: &RequestContext, mutating: bool) -> Result<ClientIdentity> {
        match Credentials::from_headers(&ctx.headers)? {
            Some(credentials) => {
                let lookup = self.store.user_by_accesskey(&credentials.accesskey);
                let user = tokio::time::timeout(self.config.store_timeout(), lookup)
                    .await
                    .map_err(|_| ApiError::StoreUnavailable("identity lookup timed out".into()))??;

                match user {
                    Some(user) if keys_match(&user.secretkey, &credentials.secretkey) => {
                        Ok(ClientIdentity::User(user.id))
                    }
                    _ => Err(ApiError::Unauthenticated),
                }
            }
            None if mutating && self.config.auth.require_auth_for_writes => {
                Err(ApiError::Unauthenticated)
            }
            None => Ok(anonymous_origin(
                &ctx.headers,
                ctx.peer,
                &self.config.auth.trusted_proxies,
            )),
        }
    }

    /// Run an operation. Request bodies are read in full first; only the
    /// store and media calls that follow count against the store budget.
    async fn dispatch(&self, op: Operation) -> Result<Dispatched> {
        match op {
            Operation::Root => Ok(Dispatched::Root),
            Operation::List(kind) => self.bounded(self.list(kind)).await.map(Dispatched::Many),
            Operation::Retrieve(kind, id) => {
                let resource = self.bounded(self.fetch(kind, id)).await?;
                Ok(Dispatched::One(StatusCode::OK, resource))
            }
            Operation::Create(kind, body) => {
                let fields = self.read_fields(body).await?;
                let created = self.create(kind, &fields).await?;
                info!(kind = kind.name(), id = created.id(), "Created");
                Ok(Dispatched::One(StatusCode::CREATED, created))
            }
            Operation::Update {
                kind,
                id,
                body,
                partial,
            } => {
                let fields = self.read_fields(body).await?;
                let updated = self.update(kind, id, &fields, partial).await?;
                info!(kind = kind.name(), id, partial, "Updated");
                Ok(Dispatched::One(StatusCode::OK, updated))
            }
            Operation::Delete(kind, id) => {
                self.bounded(async {
                    match kind {
                        Kind::User => self.store.delete_user(id).await,
                        Kind::Blog => self.store.delete_blog(id).await,
                        Kind::Entry => self.store.entries.delete(id).await,
                    }
                })
                .await?;
                info!(kind = kind.name(), id, "Deleted");
                Ok(Dispatched::Deleted)
            }
        }
    }

    /// Await a store or media call within the store budget.
    async fn bounded<T, E>(&self, call: impl Future<Output = std::result::Result<T, E>>) -> Result<T>
    where
        ApiError: From<E>,
    {
        let budget = self.config.store_timeout();
        match tokio::time::timeout(budget, call).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(_) => Err(ApiError::StoreUnavailable(format!(
                "store call exceeded {budget:?}"
            ))),
        }
    }

    async fn read_fields(&self, body: Request) -> Result<FieldSet> {
        FieldSet::from_request(body, self.config.media.max_upload_bytes).await
    }

    async fn list(&self, kind: Kind) -> Result<Vec<Resource>> {
        Ok(match kind {
            Kind::User => collect(self.store.users.list().await?),
            Kind::Blog => collect(self.store.blogs.list().await?),
            Kind::Entry => collect(self.store.entries.list().await?),
        })
    }

    async fn fetch(&self, kind: Kind, id: u64) -> Result<Resource> {
        Ok(match kind {
            Kind::User => self.store.users.get(id).await?.into(),
            Kind::Blog => self.store.blogs.get(id).await?.into(),
            Kind::Entry => self.store.entries.get(id).await?.into(),
        })
    }

    async fn create(&self, kind: Kind, fields: &FieldSet) -> Result<Resource> {
        Ok(match kind {
            Kind::User => {
                let mut user = User::default();
                user.apply(fields, false).map_err(ApiError::ValidationFailed)?;
                self.bounded(self.store.users.create(user)).await?.into()
            }
            Kind::Blog => {
                let mut blog = Blog::default();
                blog.apply(fields, false).map_err(ApiError::ValidationFailed)?;
                self.bounded(self.store.blogs.create(blog)).await?.into()
            }
            Kind::Entry => {
                let mut entry = Entry::dated(today());
                let saved = self.bounded(self.prepare_entry(&mut entry, fields, false)).await?;
                self.write_entry(self.store.entries.create(entry), saved)
                    .await?
                    .into()
            }
        })
    }

    async fn update(&self, kind: Kind, id: u64, fields: &FieldSet, partial: bool) -> Result<Resource> {
        Ok(match kind {
            Kind::User => {
                let mut user = self.bounded(self.store.users.get(id)).await?;
                user.apply(fields, partial).map_err(ApiError::ValidationFailed)?;
                self.bounded(self.store.users.update(user)).await?.into()
            }
            Kind::Blog => {
                let mut blog = self.bounded(self.store.blogs.get(id)).await?;
                blog.apply(fields, partial).map_err(ApiError::ValidationFailed)?;
                self.bounded(self.store.blogs.update(blog)).await?.into()
            }
            Kind::Entry => {
                let mut entry = self.bounded(self.store.entries.get(id)).await?;
                let saved = self.bounded(self.prepare_entry(&mut entry, fields, partial)).await?;
                self.write_entry(self.store.entries.update(entry), saved)
                    .await?
                    .into()
            }
        })
    }

    /// Store an entry. An image saved for this write is removed again if the
    /// store refuses it, so no file is left that no entry points at.
    async fn write_entry(
        &self,
        write: impl Future<Output = StoreResult<Entry>>,
        saved_image: Option<String>,
    ) -> Result<Entry> {
        match self.bounded(write).await {
            Ok(entry) => Ok(entry),
            Err(err) => {
                if let Some(url) = saved_image {
                    self.media.discard(&url).await;
                }
                Err(err)
            }
        }
    }

    /// Validate an entry, check its references exist, store any uploaded
    /// image and stamp `mod_date`. Returns the URL of a newly saved image.
    async fn prepare_entry(
        &self,
        entry: &mut Entry,
        fields: &FieldSet,
        partial: bool,
    ) -> Result<Option<String>> {
        entry.apply(fields, partial).map_err(ApiError::ValidationFailed)?;

        if let Err(err) = self.store.blogs.get(entry.blog).await {
            return Err(missing_reference("blog", entry.blog, err.into()));
        }
        for user in &entry.users {
            if let Err(err) = self.store.users.get(*user).await {
                return Err(missing_reference("users", *user, err.into()));
            }
        }

        let mut saved = None;
        match fields.get("image") {
            Some(FieldValue::File(upload)) => {
                let url = self.media.save_image(upload).await?;
                entry.image = Some(url.clone());
                saved = Some(url);
            }
            Some(FieldValue::Null) => entry.image = None,
            Some(FieldValue::Text(text)) if text.trim().is_empty() => entry.image = None,
            Some(FieldValue::Text(_)) => {
                return Err(ApiError::invalid(
                    "image",
                    "The submitted data was not a file. Check the encoding type on the form.",
                ))
            }
            None => {}
        }

        entry.mod_date = today();
        Ok(saved)
    }
}

fn collect<T: Into<Resource>>(records: Vec<T>) -> Vec<Resource> {
    records.into_iter().map(Into::into).collect()
}

/// A reference that does not resolve is a client error; anything else from
/// the store passes through.
fn missing_reference(field: &str, id: u64, err: ApiError) -> ApiError {
    match err {
        ApiError::NotFound => {
            ApiError::invalid(field, format!("Invalid pk \"{id}\" - object does not exist."))
        }
        other => other,
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Compare secrets without short-circuiting on the first differing byte.
fn keys_match(expected: &str, presented: &str) -> bool {
    let (a, b) = (expected.as_bytes(), presented.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Seconds a throttled client should wait, rounded up.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    (retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)).max(1)
}
