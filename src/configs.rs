// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Configuration
//!
//! Connection parameters for the message broker. Hosting processes usually
//! build them from the environment with [`RabbitMQConfigs::from_env`].

use crate::errors::AmqpError;
use config::{Config, Environment};
use redact::Secret;
use serde::Deserialize;

/// Prefix shared by every broker environment variable.
pub const RABBITMQ_ENV_PREFIX: &str = "RABBITMQ";

pub const RABBITMQ_HOST_ENV_KEY: &str = "RABBITMQ_HOST";
pub const RABBITMQ_PORT_ENV_KEY: &str = "RABBITMQ_PORT";
pub const RABBITMQ_USER_ENV_KEY: &str = "RABBITMQ_USER";
pub const RABBITMQ_PASSWORD_ENV_KEY: &str = "RABBITMQ_PASSWORD";
pub const RABBITMQ_VHOST_ENV_KEY: &str = "RABBITMQ_VHOST";
pub const RABBITMQ_CONNECTION_NAME_ENV_KEY: &str = "RABBITMQ_CONNECTION_NAME";

/// Parameters required to dial the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub vhost: String,
    /// Name reported to the broker for this client connection.
    pub connection_name: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned().into(),
            vhost: "/".to_owned(),
            connection_name: "domain-events".to_owned(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(RABBITMQ_ENV_PREFIX)
        .try_parsing(true)
        .ignore_empty(true)
}

impl RabbitMQConfigs {
    /// Reads the configuration from the `RABBITMQ_*` environment variables.
    ///
    /// Host, user and password are mandatory; port, vhost and connection name
    /// fall back to [`RabbitMQConfigs::default`].
    pub fn from_env() -> Result<Self, AmqpError> {
        Self::from_environment(environment())
    }

    pub(crate) fn from_environment(env: Environment) -> Result<Self, AmqpError> {
        let defaults = Self::default();

        let config = Config::builder()
            .set_default("port", i64::from(defaults.port))
            .and_then(|b| b.set_default("vhost", defaults.vhost))
            .and_then(|b| b.set_default("connection_name", defaults.connection_name))
            .map_err(|e| AmqpError::ConfigError(format!("invalid defaults: {}", e)))?
            .add_source(env)
            .build()
            .map_err(|e| AmqpError::ConfigError(format!("failed to build configuration: {}", e)))?;

        config.try_deserialize().map_err(|e| {
            AmqpError::ConfigError(format!("failed to deserialize configuration: {}", e))
        })
    }

    /// `host:port`, used to describe the dial target in logs and errors.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
