// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Propagation
//!
//! Carries the caller's trace context inside the headers of published
//! domain events so the consuming service can continue the trace.

use opentelemetry::{global, propagation::Injector, Context};
use std::collections::BTreeMap;

/// Writes propagation fields into message headers.
pub(crate) struct HeaderInjector<'a> {
    headers: &'a mut BTreeMap<String, String>,
}

impl<'a> HeaderInjector<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<String, String>) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_lowercase(), value);
    }
}

/// Injects the current OpenTelemetry context with the global propagator.
pub(crate) fn inject_current_context(headers: &mut BTreeMap<String, String>) {
    let ctx = Context::current();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut HeaderInjector::new(headers))
    });
}
