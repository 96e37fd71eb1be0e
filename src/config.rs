// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration record for a connected thing.
//!
//! [`ClientConfig`] is the validated, immutable record the rest of the
//! crate consumes. It is built through [`ClientConfigBuilder`], which
//! derives the thing key, enforces the 64-byte limit, and resolves the
//! persisted device identifier the way `hdcpython`'s `Config.update` and
//! `Client.initialize` do.

use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use crate::error::ConfigError;

/// Ports that require a TLS-wrapped MQTT connection.
pub const SECURE_PORTS: [u16; 2] = [443, 8883];

/// Default number of worker tasks.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default driver-loop tick.
pub const DEFAULT_LOOP_TIME: Duration = Duration::from_secs(1);

/// Maximum length, in bytes, of a derived thing key.
pub const MAX_THING_KEY_LEN: usize = 64;

/// TLS verification policy shared by the MQTT transport and the HTTP file
/// service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsPolicy {
    /// No certificate validation, no hostname check. TLS 1.2 is still used
    /// on the wire, but the peer is trusted unconditionally.
    Disabled,
    /// Validate against the platform's default trust store.
    DefaultTrust,
    /// Validate against an explicit CA bundle, with hostname verification.
    Bundle(PathBuf),
}

/// Proxy backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// SOCKS4 proxy.
    Socks4,
    /// SOCKS5 proxy.
    Socks5,
    /// HTTP CONNECT proxy.
    Http,
}

/// Proxy descriptor. Held as an instance field on [`ClientConfig`] (and,
/// downstream, on the Transport Adapter) rather than installed as global
/// process state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy backend type.
    pub kind: ProxyKind,
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Optional proxy credentials (username, password).
    pub credentials: Option<(String, String)>,
}

/// Validated, immutable configuration for a connected thing.
///
/// Construct via [`ClientConfigBuilder`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    app_id: String,
    device_id: String,
    thing_key: String,
    broker_host: String,
    broker_port: u16,
    token: String,
    tls: TlsPolicy,
    proxy: Option<ProxyConfig>,
    worker_count: usize,
    loop_time: Duration,
    /// `None` means retry forever.
    keep_alive_budget: Option<Duration>,
}

impl ClientConfig {
    /// Starts building a configuration for the given application and
    /// broker.
    #[must_use]
    pub fn builder(
        app_id: impl Into<String>,
        broker_host: impl Into<String>,
        broker_port: u16,
        token: impl Into<String>,
    ) -> ClientConfigBuilder {
        ClientConfigBuilder::new(app_id, broker_host, broker_port, token)
    }

    /// The application identifier.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The device identifier (persisted across runs).
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The derived thing key, `<device-id>-<application-id>`, used as the
    /// MQTT username.
    #[must_use]
    pub fn thing_key(&self) -> &str {
        &self.thing_key
    }

    /// The broker hostname.
    #[must_use]
    pub fn broker_host(&self) -> &str {
        &self.broker_host
    }

    /// The broker port.
    #[must_use]
    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    /// The cloud authentication token (used as the MQTT password).
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The TLS verification policy.
    #[must_use]
    pub fn tls(&self) -> &TlsPolicy {
        &self.tls
    }

    /// The proxy descriptor, if any.
    #[must_use]
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    /// The configured worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// The driver-loop tick duration.
    #[must_use]
    pub fn loop_time(&self) -> Duration {
        self.loop_time
    }

    /// The keep-alive reconnect budget. `None` means retry forever.
    #[must_use]
    pub fn keep_alive_budget(&self) -> Option<Duration> {
        self.keep_alive_budget
    }

    /// Returns true if this connection requires a TLS-wrapped transport,
    /// based on the configured broker port.
    #[must_use]
    pub fn requires_tls(&self) -> bool {
        SECURE_PORTS.contains(&self.broker_port)
    }
}

/// Builder for [`ClientConfig`].
///
/// Mirrors the chainable-setter/async-`build` idiom used throughout this
/// crate's protocol builders, except `build` here is synchronous: resolving
/// configuration touches the filesystem, not the network.
#[derive(Debug)]
pub struct ClientConfigBuilder {
    app_id: String,
    broker_host: String,
    broker_port: u16,
    token: String,
    config_dir: PathBuf,
    device_id: Option<String>,
    validate_cert: bool,
    ca_bundle: Option<PathBuf>,
    proxy: Option<ProxyConfig>,
    worker_count: usize,
    loop_time: Duration,
    keep_alive_budget: Option<Duration>,
}

impl ClientConfigBuilder {
    fn new(
        app_id: impl Into<String>,
        broker_host: impl Into<String>,
        broker_port: u16,
        token: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            broker_host: broker_host.into(),
            broker_port,
            token: token.into(),
            config_dir: PathBuf::from("."),
            device_id: None,
            validate_cert: true,
            ca_bundle: None,
            proxy: None,
            worker_count: DEFAULT_WORKER_COUNT,
            loop_time: DEFAULT_LOOP_TIME,
            keep_alive_budget: None,
        }
    }

    /// Sets the directory used to persist the device-id file.
    #[must_use]
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Supplies an explicit device identifier, skipping persistence.
    #[must_use]
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Disables TLS certificate validation. The connection still uses TLS
    /// on secure ports, but neither the certificate chain nor the hostname
    /// is checked.
    #[must_use]
    pub fn disable_cert_validation(mut self) -> Self {
        self.validate_cert = false;
        self
    }

    /// Supplies an explicit CA bundle to validate the broker/file-service
    /// certificate against.
    #[must_use]
    pub fn ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_bundle = Some(path.into());
        self
    }

    /// Configures an upstream proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Overrides the worker pool size. Default is
    /// [`DEFAULT_WORKER_COUNT`].
    #[must_use]
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Overrides the driver-loop tick. Default is [`DEFAULT_LOOP_TIME`].
    #[must_use]
    pub fn loop_time(mut self, tick: Duration) -> Self {
        self.loop_time = tick;
        self
    }

    /// Sets the keep-alive reconnect budget. Pass `None` to retry forever
    /// (the default).
    #[must_use]
    pub fn keep_alive_budget(mut self, budget: Option<Duration>) -> Self {
        self.keep_alive_budget = budget;
        self
    }

    /// Validates the configuration, resolving the device id and deriving
    /// the thing key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ThingKeyTooLong`] if the derived thing key
    /// exceeds [`MAX_THING_KEY_LEN`] bytes, [`ConfigError::BundleNotFound`]
    /// if an explicit CA bundle path does not exist,
    /// [`ConfigError::MissingField`] if the broker port requires TLS and
    /// certificate validation is enabled but no CA bundle was supplied
    /// (falling back to the platform trust store is not a valid outcome
    /// here), or [`ConfigError::Io`] if the device-id file cannot be read or
    /// written.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        if self.app_id.is_empty() {
            return Err(ConfigError::MissingField("app_id"));
        }
        if self.broker_host.is_empty() {
            return Err(ConfigError::MissingField("broker_host"));
        }

        if let Some(bundle) = &self.ca_bundle
            && !bundle.exists()
        {
            return Err(ConfigError::BundleNotFound(bundle.display().to_string()));
        }

        let device_id = match self.device_id {
            Some(id) => id,
            None => load_or_create_device_id(&self.config_dir)?,
        };

        let thing_key = format!("{device_id}-{}", self.app_id);
        if thing_key.len() > MAX_THING_KEY_LEN {
            return Err(ConfigError::ThingKeyTooLong {
                len: thing_key.len(),
                key: thing_key,
            });
        }

        let requires_tls = SECURE_PORTS.contains(&self.broker_port);
        let tls = if !self.validate_cert {
            TlsPolicy::Disabled
        } else if let Some(bundle) = self.ca_bundle {
            TlsPolicy::Bundle(bundle)
        } else if requires_tls {
            return Err(ConfigError::MissingField("ca_bundle"));
        } else {
            TlsPolicy::DefaultTrust
        };

        Ok(ClientConfig {
            app_id: self.app_id,
            device_id,
            thing_key,
            broker_host: self.broker_host,
            broker_port: self.broker_port,
            token: self.token,
            tls,
            proxy: self.proxy,
            worker_count: self.worker_count,
            loop_time: self.loop_time,
            keep_alive_budget: self.keep_alive_budget,
        })
    }
}

/// Reads `<config_dir>/device_id`, or generates and persists a fresh
/// random 128-bit identifier if the file is absent.
fn load_or_create_device_id(config_dir: &Path) -> Result<String, ConfigError> {
    let path = config_dir.join("device_id");

    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    std::fs::create_dir_all(config_dir)?;
    let fresh = Uuid::new_v4().to_string();
    std::fs::write(&path, &fresh)?;
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_minimal_config_with_explicit_device_id() {
        let config = ClientConfig::builder("myapp", "broker.example.com", 8883, "tok")
            .device_id("dev123")
            .disable_cert_validation()
            .build()
            .unwrap();

        assert_eq!(config.thing_key(), "dev123-myapp");
        assert_eq!(config.app_id(), "myapp");
        assert!(config.requires_tls());
    }

    #[test]
    fn rejects_empty_app_id() {
        let err = ClientConfig::builder("", "broker.example.com", 1883, "tok")
            .device_id("dev123")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("app_id")));
    }

    #[test]
    fn rejects_thing_key_over_64_bytes() {
        let long_device_id = "d".repeat(60);
        let err = ClientConfig::builder("myapp", "broker.example.com", 1883, "tok")
            .device_id(long_device_id)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ThingKeyTooLong { .. }));
    }

    #[test]
    fn rejects_missing_bundle() {
        let err = ClientConfig::builder("myapp", "broker.example.com", 8883, "tok")
            .device_id("dev123")
            .ca_bundle("/nonexistent/bundle.pem")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BundleNotFound(_)));
    }

    #[test]
    fn non_secure_port_does_not_require_tls() {
        let config = ClientConfig::builder("myapp", "broker.example.com", 1883, "tok")
            .device_id("dev123")
            .build()
            .unwrap();
        assert!(!config.requires_tls());
    }

    #[test]
    fn device_id_persists_across_builds() {
        let dir = std::env::temp_dir().join(format!("cloudlink-cfg-test-{}", Uuid::new_v4()));

        let first = ClientConfig::builder("myapp", "broker.example.com", 1883, "tok")
            .config_dir(&dir)
            .build()
            .unwrap();

        let second = ClientConfig::builder("myapp", "broker.example.com", 1883, "tok")
            .config_dir(&dir)
            .build()
            .unwrap();

        assert_eq!(first.device_id(), second.device_id());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn disable_cert_validation_overrides_bundle() {
        let config = ClientConfig::builder("myapp", "broker.example.com", 8883, "tok")
            .device_id("dev123")
            .disable_cert_validation()
            .build()
            .unwrap();
        assert_eq!(config.tls(), &TlsPolicy::Disabled);
    }

    #[test]
    fn secure_port_without_bundle_or_disabled_validation_is_bad_parameter() {
        let err = ClientConfig::builder("myapp", "broker.example.com", 8883, "tok")
            .device_id("dev123")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("ca_bundle")));
    }
}
