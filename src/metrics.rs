// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus counters for pipeline outcomes.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Request metrics, registered in a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    throttled: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("blog_api_requests_total", "Requests by operation and outcome"),
            &["operation", "outcome"],
        )?;
        let throttled = IntCounter::new(
            "blog_api_throttled_total",
            "Requests rejected by the rate limiter",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(throttled.clone()))?;

        Ok(Self {
            registry,
            requests,
            throttled,
        })
    }

    /// Count one finished request.
    pub fn observe(&self, operation: &str, outcome: &str) {
        self.requests.with_label_values(&[operation, outcome]).inc();
        if outcome == "throttled" {
            self.throttled.inc();
        }
    }

    pub fn requests(&self, operation: &str, outcome: &str) -> u64 {
        self.requests.with_label_values(&[operation, outcome]).get()
    }

    pub fn throttled(&self) -> u64 {
        self.throttled.get()
    }

    /// Text exposition format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
