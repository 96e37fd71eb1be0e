// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Work Dispatcher: a fixed pool of worker tasks draining a single queue.
//!
//! A handler failure is logged and the worker moves on to the next item —
//! it never terminates a worker task. All workers exit once the quit flag
//! is observed and the queue is drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::action::ActionRequest;
use crate::file_transfer::FileTransfer;

/// One unit of work consumed by a worker task.
pub enum WorkItem {
    /// A parsed inbound MQTT message, tagged with its topic.
    InboundMessage {
        /// The originating MQTT topic.
        topic: String,
        /// The raw UTF-8 payload.
        payload: String,
    },
    /// A request to drain and send the Publish Queue.
    FlushPublish,
    /// A pending action invocation dequeued from the mailbox.
    ActionRequest(ActionRequest),
    /// A file download awaiting its HTTP GET.
    FileDownload(Arc<FileTransfer>),
    /// A file upload awaiting its HTTP POST.
    FileUpload(Arc<FileTransfer>),
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InboundMessage { topic, .. } => {
                f.debug_struct("InboundMessage").field("topic", topic).finish()
            }
            Self::FlushPublish => f.write_str("FlushPublish"),
            Self::ActionRequest(r) => f.debug_tuple("ActionRequest").field(&r.name).finish(),
            Self::FileDownload(t) => f.debug_tuple("FileDownload").field(&t.name).finish(),
            Self::FileUpload(t) => f.debug_tuple("FileUpload").field(&t.name).finish(),
        }
    }
}

/// Parsed form of an [`WorkItem::InboundMessage`] payload, handed to
/// whatever routes messages by topic prefix (reply/, notify/).
#[must_use]
pub fn parse_inbound_json(payload: &str) -> Option<Value> {
    serde_json::from_str(payload).ok()
}

/// Handle to the work queue, held by application tasks and the Session
/// driver loop to enqueue items for the worker pool.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
}

impl WorkQueue {
    /// Creates a bounded work queue and the receiver its worker pool reads
    /// from.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WorkItem>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueues `item`. Fails only if every worker and the receiver itself
    /// have been dropped.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), mpsc::error::SendError<WorkItem>> {
        self.tx.send(item).await
    }
}

/// Runs the fixed-size worker pool, consuming `rx` until the queue is
/// closed or `quit` is observed with an empty queue.
///
/// `handle` processes one item; errors are expected to be caught and logged
/// internally by `handle` itself. As a second line of defense, each item is
/// run in its own inner task so that even an unexpected panic inside
/// `handle` only fails that one item — it's caught and logged, and the
/// worker loop keeps running, per the "a worker never terminates on
/// handler exceptions" rule.
pub async fn run_worker_pool<F, Fut>(
    mut rx: mpsc::Receiver<WorkItem>,
    worker_count: usize,
    tick: Duration,
    quit: Arc<AtomicBool>,
    handle: F,
) where
    F: Fn(WorkItem) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    // A single shared receiver fed to `worker_count` concurrent consumers,
    // matching the "fixed pool over one queue" contract without needing a
    // multi-consumer channel type the dependency stack doesn't carry.
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let mut workers = Vec::with_capacity(worker_count);

    for id in 0..worker_count {
        let rx = rx.clone();
        let quit = quit.clone();
        let handle = handle.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let item = {
                    let mut rx = rx.lock().await;
                    tokio::time::timeout(tick, rx.recv()).await
                };
                match item {
                    Ok(Some(item)) => {
                        let handle = handle.clone();
                        if let Err(join_err) = tokio::spawn(async move { handle(item).await }).await
                            && join_err.is_panic()
                        {
                            tracing::error!(worker = id, error = %join_err, "work item handler panicked");
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        if quit.load(Ordering::Acquire) {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(worker = id, "worker exiting");
        }));
    }

    for worker in workers {
        let _ = worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn worker_pool_processes_enqueued_items() {
        let (queue, rx) = WorkQueue::new(8);
        let processed = Arc::new(AtomicUsize::new(0));
        let quit = Arc::new(AtomicBool::new(false));

        queue.enqueue(WorkItem::FlushPublish).await.unwrap();
        queue.enqueue(WorkItem::FlushPublish).await.unwrap();
        drop(queue);

        let counter = processed.clone();
        run_worker_pool(rx, 2, Duration::from_millis(20), quit, move |_item| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(processed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn worker_survives_handler_panic() {
        let (queue, rx) = WorkQueue::new(8);
        let processed = Arc::new(AtomicUsize::new(0));
        let quit = Arc::new(AtomicBool::new(false));

        queue.enqueue(WorkItem::FlushPublish).await.unwrap();
        queue.enqueue(WorkItem::FlushPublish).await.unwrap();
        queue.enqueue(WorkItem::FlushPublish).await.unwrap();
        drop(queue);

        let counter = processed.clone();
        run_worker_pool(rx, 1, Duration::from_millis(20), quit, move |_item| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("simulated handler panic");
                }
            }
        })
        .await;

        assert_eq!(processed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn parses_inbound_json_payload() {
        let value = parse_inbound_json(r#"{"success":true}"#).unwrap();
        assert_eq!(value["success"], true);
    }

    #[test]
    fn invalid_payload_yields_none() {
        assert!(parse_inbound_json("not json").is_none());
    }
}
