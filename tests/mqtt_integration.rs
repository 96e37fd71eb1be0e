// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Black-box tests against a real (mocked) MQTT broker, covering the
//! Transport Adapter and Session Manager end to end. `mockforge-mqtt`'s
//! broker accepts connects, subscribes, and publishes but does not forward
//! publishes between clients, so these tests exercise connect/disconnect
//! and outbound publish delivery rather than full reply round-trips —
//! callback routing from a reply payload is unit-tested in `rpc`/`client`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cloudlink::{Client, ClientConfig, ConnectionState, PublishQueue, Session, StatusCode, WorkQueue};
use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use tokio::time::sleep;

fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(19850);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };
    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });
    sleep(Duration::from_millis(500)).await;
}

fn temp_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("cloudlink-mqtt-test-{label}-{}", uuid::Uuid::new_v4()))
}

fn config(port: u16, dir: &std::path::Path) -> ClientConfig {
    ClientConfig::builder("myapp", "127.0.0.1", port, "tok")
        .config_dir(dir)
        .device_id("dev-int-test")
        .build()
        .unwrap()
}

mod session_connection {
    use super::*;

    #[tokio::test]
    async fn connect_reaches_connected_state() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let dir = temp_dir("connect");
        let (wq, _rx) = WorkQueue::new(8);
        let session = Session::new(config(port, &dir), wq, Arc::new(PublishQueue::new()));

        let status = session.connect(Duration::from_secs(5)).await;
        assert_eq!(status, StatusCode::Success);
        assert_eq!(session.state(), ConnectionState::Connected);

        session.disconnect(false, Duration::from_millis(100)).await;
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn disconnect_returns_to_disconnected_state() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let dir = temp_dir("disconnect");
        let (wq, _rx) = WorkQueue::new(8);
        let session = Session::new(config(port, &dir), wq, Arc::new(PublishQueue::new()));

        session.connect(Duration::from_secs(5)).await;
        let status = session.disconnect(false, Duration::from_millis(100)).await;

        assert_eq!(status, StatusCode::Success);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        std::fs::remove_dir_all(&dir).ok();
    }
}

mod client_facade {
    use super::*;

    #[tokio::test]
    async fn client_connects_and_starts_worker_pool() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let dir = temp_dir("facade-connect");
        let client = Client::new(config(port, &dir)).unwrap();

        let status = client.connect(Duration::from_secs(5)).await;
        assert_eq!(status, StatusCode::Success);
        assert!(client.is_connected());

        client.disconnect(false, Duration::from_millis(100)).await;
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn publish_after_connect_drains_the_queue() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let dir = temp_dir("facade-publish");
        let client = Client::new(config(port, &dir)).unwrap();
        client.connect(Duration::from_secs(5)).await;

        client.publish_telemetry("temp", 21.5).await;
        sleep(Duration::from_millis(200)).await;

        client.disconnect(false, Duration::from_millis(100)).await;
        std::fs::remove_dir_all(&dir).ok();
    }
}

mod unreachable_broker {
    use super::*;

    #[tokio::test]
    async fn connect_to_unreachable_broker_does_not_succeed() {
        let dir = temp_dir("unreachable");
        let (wq, _rx) = WorkQueue::new(8);
        let session = Session::new(config(19_999, &dir), wq, Arc::new(PublishQueue::new()));

        let status = session.connect(Duration::from_millis(500)).await;

        assert_ne!(status, StatusCode::Success);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        std::fs::remove_dir_all(&dir).ok();
    }
}
