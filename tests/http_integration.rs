// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Black-box tests for the File Transfer Engine against a mocked HTTP file
//! service, covering the GET/PUT paths `file_transfer::run_download`/
//! `run_upload` drive once a `file.get`/`file.put` reply has attached a
//! file id.

use std::sync::Arc;
use std::time::Duration;

use cloudlink::config::TlsPolicy;
use cloudlink::file_transfer::{build_http_client, run_download, run_upload};
use cloudlink::{Direction, FileTransfer, StatusCode};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn broker_host(mock_server: &MockServer) -> String {
    mock_server.uri().replace("http://", "")
}

mod file_download {
    use super::*;

    #[tokio::test]
    async fn downloads_and_renames_into_place() {
        let body = b"firmware contents".to_vec();
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/file-123"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&mock_server)
            .await;

        let dir = std::env::temp_dir().join(format!("cloudlink-http-test-{}", uuid::Uuid::new_v4()));
        let transfer = FileTransfer::download("firmware.bin", &dir, false, None);
        transfer.attach_reply("file-123".to_string(), Some(crc32fast::hash(&body)));

        let client = build_http_client(&TlsPolicy::Disabled).unwrap();
        run_download(&transfer, &client, &broker_host(&mock_server))
            .await
            .unwrap();

        let status = transfer.wait(Duration::from_secs(1)).await;
        assert_eq!(status, StatusCode::Success);
        assert_eq!(std::fs::read(dir.join("firmware.bin")).unwrap(), body);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn crc_mismatch_fails_without_replacing_destination() {
        let body = b"firmware contents".to_vec();
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/file-456"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&mock_server)
            .await;

        let dir = std::env::temp_dir().join(format!("cloudlink-http-test-{}", uuid::Uuid::new_v4()));
        let transfer = FileTransfer::download("firmware.bin", &dir, false, None);
        transfer.attach_reply("file-456".to_string(), Some(0xDEAD_BEEF));

        let client = build_http_client(&TlsPolicy::Disabled).unwrap();
        run_download(&transfer, &client, &broker_host(&mock_server))
            .await
            .unwrap();

        let status = transfer.wait(Duration::from_secs(1)).await;
        assert_eq!(status, StatusCode::Failure);
        assert!(!dir.join("firmware.bin").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn server_error_marks_transfer_failed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let dir = std::env::temp_dir().join(format!("cloudlink-http-test-{}", uuid::Uuid::new_v4()));
        let transfer = FileTransfer::download("firmware.bin", &dir, false, None);
        transfer.attach_reply("missing".to_string(), None);

        let client = build_http_client(&TlsPolicy::Disabled).unwrap();
        run_download(&transfer, &client, &broker_host(&mock_server))
            .await
            .unwrap();

        assert_eq!(transfer.wait(Duration::from_secs(1)).await, StatusCode::Failure);
        std::fs::remove_dir_all(&dir).ok();
    }
}

mod file_upload {
    use super::*;

    #[tokio::test]
    async fn uploads_local_file_contents() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/file/file-789"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let dir = std::env::temp_dir().join(format!("cloudlink-http-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let local_path = dir.join("log.txt");
        std::fs::write(&local_path, b"log line").unwrap();

        let transfer = FileTransfer::upload("log.txt", &local_path, false, None).unwrap();
        assert_eq!(transfer.direction, Direction::Upload);
        transfer.attach_reply("file-789".to_string(), None);

        let client = build_http_client(&TlsPolicy::Disabled).unwrap();
        run_upload(&transfer, &client, &broker_host(&mock_server)).await.unwrap();

        assert_eq!(transfer.wait(Duration::from_secs(1)).await, StatusCode::Success);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn rejected_upload_marks_transfer_failed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/file/file-rejected"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let dir = std::env::temp_dir().join(format!("cloudlink-http-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let local_path = dir.join("log.txt");
        std::fs::write(&local_path, b"log line").unwrap();

        let transfer = FileTransfer::upload("log.txt", &local_path, false, None).unwrap();
        transfer.attach_reply("file-rejected".to_string(), None);

        let client = build_http_client(&TlsPolicy::Disabled).unwrap();
        run_upload(&transfer, &client, &broker_host(&mock_server)).await.unwrap();

        assert_eq!(transfer.wait(Duration::from_secs(1)).await, StatusCode::Failure);
        std::fs::remove_dir_all(&dir).ok();
    }
}

mod completion_callback {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn callback_fires_with_final_status() {
        let body = b"data".to_vec();
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/cb-file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&mock_server)
            .await;

        let seen: Arc<Mutex<Option<StatusCode>>> = Arc::new(Mutex::new(None));
        let seen_in_callback = seen.clone();
        let callback: cloudlink::CompletionCallback = Box::new(move |_name, status| {
            *seen_in_callback.lock().unwrap() = Some(status);
        });

        let dir = std::env::temp_dir().join(format!("cloudlink-http-test-{}", uuid::Uuid::new_v4()));
        let transfer = FileTransfer::download("data.bin", &dir, false, Some(callback));
        transfer.attach_reply("cb-file".to_string(), Some(crc32fast::hash(&body)));

        let client = build_http_client(&TlsPolicy::Disabled).unwrap();
        run_download(&transfer, &client, &broker_host(&mock_server))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(StatusCode::Success));
        std::fs::remove_dir_all(&dir).ok();
    }
}
