// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Domain Event Publishing
//!
//! Builds the broker message for a domain event: persistent JSON body, the
//! event type as AMQP `type`, a fresh message id and the propagated trace
//! context.

use crate::{broker::Publishing, otel};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Content type of published domain events
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Builds the persistent message published for `event_type`.
pub fn domain_event(body: &str, event_type: &str) -> Publishing {
    let mut headers = BTreeMap::new();
    otel::inject_current_context(&mut headers);

    Publishing {
        body: body.as_bytes().to_vec(),
        content_type: JSON_CONTENT_TYPE.to_owned(),
        persistent: true,
        kind: Some(event_type.to_owned()),
        message_id: Some(Uuid::new_v4().to_string()),
        headers,
    }
}

/// Routing key of `event_type` within an event family.
pub fn routing_key(prefix: &str, event_type: &str) -> String {
    format!("{}{}", prefix, event_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_event_is_persistent_json() {
        let msg = domain_event(r#"{"a":1}"#, "order_paid");

        assert_eq!(msg.body, br#"{"a":1}"#.to_vec());
        assert_eq!(msg.content_type, "application/json; charset=utf-8");
        assert!(msg.persistent);
        assert_eq!(msg.kind.as_deref(), Some("order_paid"));
        assert!(msg.message_id.is_some());
    }

    #[test]
    fn message_ids_are_unique() {
        let a = domain_event("{}", "order_paid");
        let b = domain_event("{}", "order_paid");
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn routing_key_prepends_the_family_prefix() {
        assert_eq!(routing_key("order.", "order_paid"), "order.order_paid");
    }
}
