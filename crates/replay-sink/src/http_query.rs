use std::sync::Arc;
use std::time::Duration;

use replay_protocol::StepPayload;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::contract::{OutputSink, ParamNamer};
use crate::error::SinkError;

const RETRY_BACKOFF_UNIT: Duration = Duration::from_millis(50);
const RETRY_BACKOFF_CAP: Duration = Duration::from_millis(200);

/// Builds the query string for one batch: `supplier=<name>` followed by one
/// `<paramName>=<value>` pair per update, values rendered as shortest
/// round-trip decimal (Rust's default `f64` `Display` already does this).
fn build_query(supplier: &str, namer: &dyn ParamNamer, payload: &StepPayload) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(payload.updates.len() + 1);
    pairs.push(("supplier".to_owned(), supplier.to_owned()));
    for update in &payload.updates {
        pairs.push((namer.param_name(update.id), update.value.to_string()));
    }
    pairs
}

async fn send_with_retry(
    client: &reqwest::Client,
    endpoint: &str,
    pairs: &[(String, String)],
    max_retries: u32,
    request_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), SinkError> {
    let mut attempt = 0;
    loop {
        let request = client.get(endpoint).query(pairs).timeout(request_timeout);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SinkError::Cancelled),
            result = request.send() => result,
        };

        match outcome {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                let status = response.status().as_u16();
                if attempt >= max_retries {
                    return Err(SinkError::NonSuccessStatus(status));
                }
                debug!(status, attempt, "sink request failed, retrying");
            }
            Err(err) => {
                if attempt >= max_retries {
                    return Err(SinkError::Request(err));
                }
                debug!(error = %err, attempt, "sink request errored, retrying");
            }
        }

        attempt += 1;
        let backoff = (RETRY_BACKOFF_UNIT * attempt).min(RETRY_BACKOFF_CAP);
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SinkError::Cancelled),
            () = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Synchronous HTTP query sink: `send` blocks until the batch has been
/// fully delivered (including retries).
pub struct HttpQuerySink<N> {
    client: reqwest::Client,
    endpoint: String,
    supplier: String,
    namer: N,
    request_timeout: Duration,
    max_retries: u32,
}

impl<N: ParamNamer> HttpQuerySink<N> {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, supplier: impl Into<String>, namer: N) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            supplier: supplier.into(),
            namer,
            request_timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl<N: ParamNamer> OutputSink for HttpQuerySink<N> {
    async fn send(
        &self,
        payload: &StepPayload,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        let pairs = build_query(&self.supplier, &self.namer, payload);
        send_with_retry(
            &self.client,
            &self.endpoint,
            &pairs,
            self.max_retries,
            self.request_timeout,
            cancel,
        )
        .await
    }
}

struct WorkItem {
    payload: StepPayload,
}

/// A lazily started pool of `worker_count` long-lived workers, each reading
/// from its own bounded queue. `send` routes a batch to the worker for its
/// `step_id` (`step_id % worker_count`) so every sub-batch of one step lands
/// on the same worker's FIFO queue, preserving `batch_id` order even though
/// delivery is not synchronous with `send`.
///
/// Grounded in `timer-core::workers::client_connector`'s dispatch-over-`mpsc`
/// shape, generalised from "one bus feeding one pool" to "N independent
/// per-worker buses" so ordering survives the fan-out.
pub struct WorkerPoolHttpQuerySink {
    senders: Vec<mpsc::Sender<WorkItem>>,
}

impl WorkerPoolHttpQuerySink {
    pub fn start<N>(
        worker_count: usize,
        queue_depth: usize,
        endpoint: impl Into<String>,
        supplier: impl Into<String>,
        namer: N,
    ) -> Self
    where
        N: ParamNamer + 'static,
    {
        let endpoint = Arc::new(endpoint.into());
        let supplier = Arc::new(supplier.into());
        let namer = Arc::new(namer);
        let client = reqwest::Client::new();
        let mut senders = Vec::with_capacity(worker_count.max(1));

        for worker_id in 0..worker_count.max(1) {
            let (tx, mut rx) = mpsc::channel::<WorkItem>(queue_depth.max(1));
            let client = client.clone();
            let endpoint = Arc::clone(&endpoint);
            let supplier = Arc::clone(&supplier);
            let namer = Arc::clone(&namer);

            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                while let Some(item) = rx.recv().await {
                    let pairs = build_query(&supplier, namer.as_ref(), &item.payload);
                    if let Err(err) = send_with_retry(
                        &client,
                        &endpoint,
                        &pairs,
                        3,
                        Duration::from_secs(5),
                        &cancel,
                    )
                    .await
                    {
                        warn!(worker_id, step_id = item.payload.step_id, error = %err, "sink worker failed to deliver batch");
                    }
                }
                debug!(worker_id, "sink worker shutting down, queue closed");
            });

            senders.push(tx);
        }

        Self { senders }
    }
}

impl OutputSink for WorkerPoolHttpQuerySink {
    async fn send(
        &self,
        payload: &StepPayload,
        _cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        let worker = (payload.step_id as usize) % self.senders.len();
        self.senders[worker]
            .try_send(WorkItem {
                payload: payload.clone(),
            })
            .map_err(|_| SinkError::QueueFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::HashParamNamer;
    use replay_protocol::SensorUpdate;

    fn payload(step_id: u64) -> StepPayload {
        StepPayload {
            step_id,
            step_ts: 1_000,
            batch_id: 1,
            batch_total: 1,
            updates: vec![SensorUpdate {
                id: 42,
                value: 1.0 / 3.0,
                has_value: true,
            }],
        }
    }

    #[test]
    fn build_query_includes_supplier_and_shortest_round_trip_value() {
        let pairs = build_query("dash", &HashParamNamer, &payload(1));
        assert_eq!(pairs[0], ("supplier".to_owned(), "dash".to_owned()));
        assert_eq!(pairs[1].0, "id42");
        assert_eq!(pairs[1].1, (1.0f64 / 3.0).to_string());
    }

    #[tokio::test]
    async fn worker_pool_routes_same_step_to_same_worker() {
        let sink =
            WorkerPoolHttpQuerySink::start(4, 8, "http://127.0.0.1:9", "dash", HashParamNamer);
        let cancel = CancellationToken::new();
        // step_id 1 and 5 land on worker 1 (mod 4); just confirm enqueue
        // succeeds without panicking even though nothing is listening.
        sink.send(&payload(1), &cancel).await.unwrap();
        sink.send(&payload(5), &cancel).await.unwrap();
    }
}
