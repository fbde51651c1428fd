// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Caller identification.
//!
//! Requests authenticate with `Authorization: AccessKey <accesskey>:<secretkey>`.
//! Requests without credentials are attributed to their network origin so
//! that anonymous traffic is still throttled per caller.

use crate::error::{ApiError, Result};
use axum::http::{header, HeaderMap};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

const SCHEME: &str = "AccessKey";

/// Rate-limiter bucket key for one caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    /// Authenticated user, keyed by primary id.
    User(u64),
    /// Unauthenticated caller, keyed by origin address.
    Anonymous(String),
}

impl ClientIdentity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Anonymous(origin) => write!(f, "anon:{origin}"),
        }
    }
}

/// Key pair presented by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub accesskey: String,
    pub secretkey: String,
}

impl Credentials {
    /// Parse credentials from the `Authorization` header.
    ///
    /// `Ok(None)` means no credentials were offered. Other schemes are left
    /// alone; a malformed `AccessKey` header is rejected.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let value = value.to_str().map_err(|_| ApiError::Unauthenticated)?;

        let Some((scheme, token)) = value.trim().split_once(' ') else {
            return Ok(None);
        };
        if !scheme.eq_ignore_ascii_case(SCHEME) {
            return Ok(None);
        }

        match token.trim().split_once(':') {
            Some((accesskey, secretkey)) if !accesskey.is_empty() && !secretkey.is_empty() => {
                Ok(Some(Self {
                    accesskey: accesskey.to_string(),
                    secretkey: secretkey.to_string(),
                }))
            }
            _ => Err(ApiError::Unauthenticated),
        }
    }
}

/// Origin of an anonymous caller.
///
/// The connecting peer address, unless the peer is one of `trusted_proxies`.
/// Then the nearest `X-Forwarded-For` hop that is not itself a trusted proxy
/// is used. Clients cannot pick their own bucket by sending the header.
pub fn anonymous_origin(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> ClientIdentity {
    let peer = peer.map(|addr| addr.ip());
    let forwarded = peer
        .filter(|ip| trusted_proxies.contains(ip))
        .and_then(|_| forwarded_client(headers, trusted_proxies));

    let origin = forwarded
        .or(peer)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    ClientIdentity::Anonymous(origin)
}

/// Walk `X-Forwarded-For` from the nearest hop outwards, skipping trusted proxies.
fn forwarded_client(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let hops: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|hop| hop.trim().parse::<IpAddr>().ok())
        .collect::<Option<_>>()?;

    hops.iter()
        .rev()
        .find(|hop| !trusted_proxies.contains(*hop))
        .or_else(|| hops.first())
        .copied()
}
