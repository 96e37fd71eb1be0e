// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File Transfer Engine: chunked, CRC-32 validated HTTP GET/PUT against the
//! cloud's per-thing file service.
//!
//! Mirrors `protocol/http.rs`'s `HttpClient`/builder split — a `reqwest`
//! client built once from the connection's TLS policy, reused across
//! transfers — but adds the rolling-CRC streaming and atomic rename this
//! module's spec requires.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::Client;
use uuid::Uuid;

use crate::config::TlsPolicy;
use crate::error::{FileTransferError, StatusCode};

const CHUNK_SIZE: usize = 512;

/// A callback invoked once a transfer reaches a terminal status.
pub type CompletionCallback = Box<dyn Fn(&str, StatusCode) + Send + Sync>;

/// Direction of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Downloading a file from the cloud.
    Download,
    /// Uploading a file to the cloud.
    Upload,
}

/// A single in-flight (or completed) file transfer.
///
/// `status` starts `None` ("null while in flight" per the data model) and
/// is written exactly once, by the worker that handles the transfer.
pub struct FileTransfer {
    /// Upload or download.
    pub direction: Direction,
    /// The logical file name as known to the cloud.
    pub name: String,
    /// The local filesystem path (destination for downloads, source for
    /// uploads).
    pub local_path: PathBuf,
    /// Whether the file is in the thing's private namespace or shared
    /// globally.
    pub global: bool,
    /// The local file's CRC-32, precomputed for uploads.
    pub local_crc32: Option<u32>,
    file_id: RwLock<Option<String>>,
    expected_crc32: RwLock<Option<u32>>,
    status: RwLock<Option<StatusCode>>,
    callback: Option<CompletionCallback>,
}

impl FileTransfer {
    /// Builds a download transfer. If `destination` names an existing
    /// directory, the final path becomes `destination/name`.
    #[must_use]
    pub fn download(
        name: impl Into<String>,
        destination: impl Into<PathBuf>,
        global: bool,
        callback: Option<CompletionCallback>,
    ) -> Arc<Self> {
        let name = name.into();
        let mut local_path = destination.into();
        if local_path.is_dir() {
            local_path.push(&name);
        }

        Arc::new(Self {
            direction: Direction::Download,
            name,
            local_path,
            global,
            local_crc32: None,
            file_id: RwLock::new(None),
            expected_crc32: RwLock::new(None),
            status: RwLock::new(None),
            callback,
        })
    }

    /// Builds an upload transfer, computing the local file's CRC-32.
    ///
    /// # Errors
    ///
    /// Returns [`FileTransferError::NotAbsolutePath`] if `local_path` is not
    /// an existing absolute path.
    pub fn upload(
        name: impl Into<String>,
        local_path: impl Into<PathBuf>,
        global: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<Arc<Self>, FileTransferError> {
        let local_path = local_path.into();
        if !local_path.is_absolute() || !local_path.is_file() {
            return Err(FileTransferError::NotAbsolutePath(
                local_path.display().to_string(),
            ));
        }

        let bytes = std::fs::read(&local_path)?;
        let local_crc32 = Some(crc32fast::hash(&bytes));

        Ok(Arc::new(Self {
            direction: Direction::Upload,
            name: name.into(),
            local_path,
            global,
            local_crc32,
            file_id: RwLock::new(None),
            expected_crc32: RwLock::new(None),
            status: RwLock::new(None),
            callback,
        }))
    }

    /// Attaches the cloud-assigned file id (and, for downloads, the
    /// expected CRC-32) once the `file.get`/`file.put` reply arrives.
    pub fn attach_reply(&self, file_id: String, expected_crc32: Option<u32>) {
        *self.file_id.write() = Some(file_id);
        *self.expected_crc32.write() = expected_crc32;
    }

    /// The cloud-assigned file id, if the reply has arrived.
    #[must_use]
    pub fn file_id(&self) -> Option<String> {
        self.file_id.read().clone()
    }

    /// The transfer's status. `None` while in flight.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        *self.status.read()
    }

    /// Marks this transfer failed without attempting a network request,
    /// e.g. when the cloud's `file.get`/`file.put` reply itself reports an
    /// error.
    pub fn mark_failed(&self, status: StatusCode) {
        self.finish(status);
    }

    fn finish(&self, status: StatusCode) {
        *self.status.write() = Some(status);
        if let Some(callback) = &self.callback {
            callback(&self.name, status);
        }
    }

    /// Polls `status` every 50 ms, async-friendly (no spin-wait thread),
    /// returning the final status or [`StatusCode::TimedOut`] if `timeout`
    /// elapses first. `timeout` of zero waits unbounded.
    pub async fn wait(&self, timeout: Duration) -> StatusCode {
        let deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);
        loop {
            if let Some(status) = self.status() {
                return status;
            }
            if let Some(deadline) = deadline
                && tokio::time::Instant::now() >= deadline
            {
                return StatusCode::TimedOut;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Builds the `reqwest::Client` used for all file-service requests,
/// applying the same TLS policy the MQTT transport uses.
///
/// # Errors
///
/// Returns [`FileTransferError::Transport`] if the bundle cannot be read or
/// the client cannot be constructed.
pub fn build_http_client(tls: &TlsPolicy) -> Result<Client, FileTransferError> {
    let mut builder = Client::builder();
    match tls {
        TlsPolicy::Disabled => {
            builder = builder.danger_accept_invalid_certs(true);
        }
        TlsPolicy::DefaultTrust => {}
        TlsPolicy::Bundle(path) => {
            let pem = std::fs::read(path)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| FileTransferError::Transport(e.to_string()))?;
            builder = builder.add_root_certificate(cert).tls_built_in_root_certs(false);
        }
    }
    builder
        .build()
        .map_err(|e| FileTransferError::Transport(e.to_string()))
}

fn file_url(broker_host: &str, file_id: &str) -> String {
    format!("https://{broker_host}/file/{file_id}")
}

/// Executes a download transfer's worker-side steps: streamed GET, rolling
/// CRC-32, atomic temp-file-then-rename.
///
/// # Errors
///
/// Returns [`FileTransferError`] if no file id has been attached yet.
pub async fn run_download(
    transfer: &Arc<FileTransfer>,
    client: &Client,
    broker_host: &str,
) -> Result<(), FileTransferError> {
    let Some(file_id) = transfer.file_id() else {
        return Err(FileTransferError::Transport(
            "no file id attached to transfer".to_string(),
        ));
    };

    if let Some(parent) = transfer.local_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let part_path = transfer
        .local_path
        .with_extension(format!("{}.part", Uuid::new_v4()));

    let result = download_into(transfer, client, &file_id, broker_host, &part_path).await;

    match result {
        Ok(true) => {
            tokio::fs::rename(&part_path, &transfer.local_path).await?;
            transfer.finish(StatusCode::Success);
        }
        Ok(false) => {
            tokio::fs::remove_file(&part_path).await.ok();
            transfer.finish(StatusCode::Failure);
        }
        Err(e) => {
            tokio::fs::remove_file(&part_path).await.ok();
            tracing::warn!(error = %e, name = %transfer.name, "file download failed");
            transfer.finish(StatusCode::Failure);
        }
    }

    Ok(())
}

/// Returns `Ok(true)` on a CRC match (or no expected CRC supplied),
/// `Ok(false)` on a CRC mismatch, `Err` on transport/I/O failure.
async fn download_into(
    transfer: &FileTransfer,
    client: &Client,
    file_id: &str,
    broker_host: &str,
    part_path: &Path,
) -> Result<bool, FileTransferError> {
    use tokio::io::AsyncWriteExt;

    let response = client
        .get(file_url(broker_host, file_id))
        .send()
        .await
        .map_err(|e| FileTransferError::Transport(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FileTransferError::Transport(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let mut file = tokio::fs::File::create(part_path).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut response = response;
    let mut pending = Vec::with_capacity(CHUNK_SIZE);

    while let Some(bytes) = response
        .chunk()
        .await
        .map_err(|e| FileTransferError::Transport(e.to_string()))?
    {
        pending.extend_from_slice(&bytes);
        while pending.len() >= CHUNK_SIZE {
            let chunk: Bytes = pending.drain(..CHUNK_SIZE).collect();
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            tracing::debug!(bytes = CHUNK_SIZE, name = %transfer.name, "wrote download chunk");
        }
    }
    if !pending.is_empty() {
        hasher.update(&pending);
        file.write_all(&pending).await?;
    }
    file.flush().await?;

    let computed = hasher.finalize();
    match transfer.expected_crc32.read().as_ref() {
        Some(expected) if *expected != computed => {
            tracing::warn!(expected = %expected, actual = %computed, name = %transfer.name, "CRC mismatch");
            Ok(false)
        }
        _ => Ok(true),
    }
}

/// Executes an upload transfer's worker-side steps: POST the file body to
/// the assigned file id.
///
/// # Errors
///
/// Returns [`FileTransferError`] if no file id has been attached yet.
pub async fn run_upload(
    transfer: &Arc<FileTransfer>,
    client: &Client,
    broker_host: &str,
) -> Result<(), FileTransferError> {
    let Some(file_id) = transfer.file_id() else {
        return Err(FileTransferError::Transport(
            "no file id attached to transfer".to_string(),
        ));
    };

    let body = tokio::fs::read(&transfer.local_path).await?;

    let response = client
        .post(file_url(broker_host, &file_id))
        .body(body)
        .send()
        .await
        .map_err(|e| FileTransferError::Transport(e.to_string()));

    match response {
        Ok(r) if r.status().is_success() => transfer.finish(StatusCode::Success),
        Ok(r) => {
            tracing::warn!(status = %r.status(), name = %transfer.name, "upload rejected");
            transfer.finish(StatusCode::Failure);
        }
        Err(e) => {
            tracing::warn!(error = %e, name = %transfer.name, "file upload failed");
            transfer.finish(StatusCode::Failure);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_with_directory_destination_appends_name() {
        let dir = std::env::temp_dir();
        let transfer = FileTransfer::download("f.bin", &dir, false, None);
        assert_eq!(transfer.local_path, dir.join("f.bin"));
    }

    #[test]
    fn upload_rejects_relative_path() {
        let err = FileTransfer::upload("f.bin", "relative/path.bin", false, None).unwrap_err();
        assert!(matches!(err, FileTransferError::NotAbsolutePath(_)));
    }

    #[test]
    fn upload_computes_local_crc() {
        let dir = std::env::temp_dir().join(format!("cloudlink-ft-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("f.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let transfer = FileTransfer::upload("f.bin", &path, false, None).unwrap();
        assert_eq!(transfer.local_crc32, Some(crc32fast::hash(b"hello world")));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn status_starts_unset() {
        let transfer = FileTransfer::download("f.bin", std::env::temp_dir(), false, None);
        assert!(transfer.status().is_none());
    }

    #[tokio::test]
    async fn wait_times_out_when_never_finished() {
        let transfer = FileTransfer::download("f.bin", std::env::temp_dir(), false, None);
        let status = transfer.wait(Duration::from_millis(100)).await;
        assert_eq!(status, StatusCode::TimedOut);
    }

    #[test]
    fn default_trust_builds_a_client() {
        assert!(build_http_client(&TlsPolicy::DefaultTrust).is_ok());
    }

    #[tokio::test]
    async fn run_download_writes_body_and_reports_success() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let body = b"chunked body contents".to_vec();
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&mock_server)
            .await;

        let dir = std::env::temp_dir().join(format!("cloudlink-ft-test-{}", Uuid::new_v4()));
        let transfer = FileTransfer::download("out.bin", &dir, false, None);
        transfer.attach_reply("abc".to_string(), Some(crc32fast::hash(&body)));

        let client = build_http_client(&TlsPolicy::Disabled).unwrap();
        let broker_host = mock_server.uri().replace("http://", "");
        run_download(&transfer, &client, &broker_host).await.unwrap();

        assert_eq!(transfer.status(), Some(StatusCode::Success));
        assert_eq!(std::fs::read(dir.join("out.bin")).unwrap(), body);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn run_upload_posts_file_body_and_reports_success() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/file/xyz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let dir = std::env::temp_dir().join(format!("cloudlink-ft-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let local_path = dir.join("f.bin");
        std::fs::write(&local_path, b"hello world").unwrap();

        let transfer = FileTransfer::upload("f.bin", &local_path, false, None).unwrap();
        transfer.attach_reply("xyz".to_string(), None);

        let client = build_http_client(&TlsPolicy::Disabled).unwrap();
        let broker_host = mock_server.uri().replace("http://", "");
        run_upload(&transfer, &client, &broker_host).await.unwrap();

        assert_eq!(transfer.status(), Some(StatusCode::Success));
        std::fs::remove_dir_all(&dir).ok();
    }
}
