// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport Adapter: owns the MQTT connection, TLS policy, and proxy
//! configuration for one session.
//!
//! Mirrors `MqttBroker`'s builder-then-event-loop idiom: `connect` spawns a
//! task driving `rumqttc`'s `EventLoop` and waits for the first CONNACK
//! before returning. TLS and proxy policy are resolved from the
//! [`ClientConfig`] passed in, never from global process state, so two
//! sessions in the same process can hold different policies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport as MqttTransport};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::{ClientConfig, TlsPolicy};
use crate::error::ProtocolError;

/// One inbound MQTT publish, handed to the Work Dispatcher for routing.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// The full MQTT topic, e.g. `reply/0007` or `notify/mailbox_activity`.
    pub topic: String,
    /// The UTF-8 payload.
    pub payload: String,
}

/// A live connection to the broker.
///
/// Cheaply cloneable; the underlying `rumqttc::AsyncClient` is itself an
/// `Arc`-backed handle, and connection status is tracked behind an atomic.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    client: AsyncClient,
    connected: AtomicBool,
    /// Locally assigned sequence number for each publish, used to let the
    /// Reply Tracker correlate a publish with its batch. Not the MQTT wire
    /// packet identifier.
    publish_seq: AtomicU16,
}

impl Transport {
    /// Connects to the broker described by `config`, waiting up to
    /// `connect_timeout` for the CONNACK.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ProxyUnsupported`] if `config` carries a
    /// proxy descriptor (`rumqttc` has no public hook for a caller-supplied
    /// stream, so a configured proxy is rejected rather than silently
    /// ignored), [`ProtocolError::TlsConfig`] if the TLS policy cannot be
    /// resolved into a `rustls` configuration, or
    /// [`ProtocolError::ConnectionFailed`] if the event loop dies or the
    /// CONNACK does not arrive before the timeout.
    pub async fn connect(
        config: &ClientConfig,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>), ProtocolError> {
        if let Some(proxy) = config.proxy() {
            return Err(ProtocolError::ProxyUnsupported(format!(
                "{:?} proxy ({}:{})",
                proxy.kind, proxy.host, proxy.port
            )));
        }

        let client_id = format!("cloudlink-{}-{}", std::process::id(), config.device_id());
        let broker = broker_address(config);
        let mut options = MqttOptions::new(client_id, broker, config.broker_port());
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);
        options.set_credentials(config.thing_key(), config.token());

        if config.requires_tls() {
            options.set_transport(build_tls_transport(config.tls(), config.broker_port())?);
        }

        let (client, event_loop) = AsyncClient::new(options, 64);

        let inner = Arc::new(TransportInner {
            client,
            connected: AtomicBool::new(false),
            publish_seq: AtomicU16::new(0),
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (connack_tx, connack_rx) = oneshot::channel();

        let driver_inner = inner.clone();
        tokio::spawn(async move {
            drive_event_loop(event_loop, driver_inner, inbound_tx, Some(connack_tx)).await;
        });

        match tokio::time::timeout(connect_timeout, connack_rx).await {
            Ok(Ok(())) => {
                inner.connected.store(true, Ordering::Release);
            }
            Ok(Err(_)) => {
                return Err(ProtocolError::ConnectionFailed(
                    "MQTT event loop terminated before CONNACK".to_string(),
                ));
            }
            Err(_) => {
                return Err(ProtocolError::ConnectionFailed(format!(
                    "connection timed out after {}ms",
                    connect_timeout.as_millis()
                )));
            }
        }

        Ok((Self { inner }, inbound_rx))
    }

    /// Returns whether the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Subscribes to `topic` at QoS 1.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Mqtt`] if the subscribe request fails.
    pub async fn subscribe(&self, topic: &str) -> Result<(), ProtocolError> {
        self.inner
            .client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(ProtocolError::Mqtt)
    }

    /// Publishes `payload` to `topic` at QoS 1 and returns a locally
    /// assigned sequence number for correlating this publish with the
    /// tracker entries it carried.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Mqtt`] if the publish fails.
    pub async fn publish(&self, topic: String, payload: Value) -> Result<u16, ProtocolError> {
        let body = serde_json::to_vec(&payload)
            .map_err(|e| ProtocolError::ConnectionFailed(format!("encoding publish payload: {e}")))?;

        self.inner
            .client
            .publish(&topic, QoS::AtLeastOnce, false, body)
            .await
            .map_err(ProtocolError::Mqtt)?;

        Ok(self.inner.publish_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Disconnects from the broker.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Mqtt`] if the disconnect request fails.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.inner.client.disconnect().await.map_err(ProtocolError::Mqtt)?;
        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    inner: Arc<TransportInner>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    connack_tx: Option<oneshot::Sender<()>>,
) {
    let mut connack_tx = connack_tx;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "connected to broker");
                inner.connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Ok(payload) = String::from_utf8(publish.payload.to_vec()) {
                    tracing::debug!(topic = %publish.topic, "inbound message");
                    let message = InboundMessage {
                        topic: publish.topic,
                        payload,
                    };
                    if inbound_tx.send(message).await.is_err() {
                        tracing::warn!("inbound channel closed, dropping message");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("broker closed the connection");
                inner.connected.store(false, Ordering::Release);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT event loop error");
                inner.connected.store(false, Ordering::Release);
                break;
            }
        }
    }
}

/// Port 443 is tunnelled as MQTT-over-WebSocket (the port most outbound
/// firewalls leave open for plain HTTPS); any other port speaks MQTT
/// directly over the TCP/TLS stream.
const WEBSOCKET_TUNNEL_PORT: u16 = 443;

fn broker_address(config: &ClientConfig) -> String {
    if config.broker_port() == WEBSOCKET_TUNNEL_PORT {
        format!("wss://{}:{}/mqtt", config.broker_host(), config.broker_port())
    } else {
        config.broker_host().to_string()
    }
}

fn build_tls_transport(policy: &TlsPolicy, port: u16) -> Result<MqttTransport, ProtocolError> {
    let tls_config = match policy {
        TlsPolicy::Disabled => insecure_rustls_config(),
        TlsPolicy::DefaultTrust => native_roots_rustls_config()?,
        TlsPolicy::Bundle(path) => bundle_rustls_config(path)?,
    };
    let tls_config = rumqttc::TlsConfiguration::Rustls(Arc::new(tls_config));
    Ok(if port == WEBSOCKET_TUNNEL_PORT {
        MqttTransport::Wss(tls_config)
    } else {
        MqttTransport::Tls(tls_config)
    })
}

fn rustls_builder()
-> rustls::ConfigBuilder<rustls::ClientConfig, rustls::WantsVerifier> {
    rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("rustls's own default protocol version list is always valid")
}

fn native_roots_rustls_config() -> Result<rustls::ClientConfig, ProtocolError> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        roots
            .add(cert)
            .map_err(|e| ProtocolError::TlsConfig(e.to_string()))?;
    }
    Ok(rustls_builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn bundle_rustls_config(path: &std::path::Path) -> Result<rustls::ClientConfig, ProtocolError> {
    let pem = std::fs::read(path)
        .map_err(|e| ProtocolError::TlsConfig(format!("{}: {e}", path.display())))?;

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| ProtocolError::TlsConfig(e.to_string()))?;
        roots
            .add(cert)
            .map_err(|e| ProtocolError::TlsConfig(e.to_string()))?;
    }

    Ok(rustls_builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn insecure_rustls_config() -> rustls::ClientConfig {
    rustls_builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoServerVerification))
        .with_no_client_auth()
}

/// Accepts any server certificate. Used only for [`TlsPolicy::Disabled`].
#[derive(Debug)]
struct NoServerVerification;

impl rustls::client::danger::ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn disabled_policy_builds_insecure_transport() {
        let transport = build_tls_transport(&TlsPolicy::Disabled, 8883);
        assert!(transport.is_ok());
    }

    #[test]
    fn default_trust_policy_builds_native_roots_transport() {
        let transport = build_tls_transport(&TlsPolicy::DefaultTrust, 8883);
        assert!(transport.is_ok());
    }

    #[test]
    fn missing_bundle_file_is_a_tls_config_error() {
        let policy = TlsPolicy::Bundle(PathBuf::from("/nonexistent/ca-bundle.pem"));
        let err = build_tls_transport(&policy, 8883).unwrap_err();
        assert!(matches!(err, ProtocolError::TlsConfig(_)));
    }

    #[test]
    fn port_443_selects_websocket_tunnel() {
        let transport = build_tls_transport(&TlsPolicy::DefaultTrust, 443).unwrap();
        assert!(matches!(transport, MqttTransport::Wss(_)));
    }

    #[test]
    fn port_8883_selects_plain_tls() {
        let transport = build_tls_transport(&TlsPolicy::DefaultTrust, 8883).unwrap();
        assert!(matches!(transport, MqttTransport::Tls(_)));
    }

    #[test]
    fn no_server_verification_exposes_signature_schemes() {
        assert!(!NoServerVerification.supported_verify_schemes().is_empty());
    }
}
