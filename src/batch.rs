use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::client::InferenceClient;
use crate::error::{Error, ErrorDetails};
use crate::types::{RequestEnvelope, ResponseEnvelope};

impl InferenceClient {
    /// Dispatches a batch of independent requests under the configured
    /// concurrency cap and returns one outcome per input, index-aligned
    /// with the input order regardless of completion order.
    ///
    /// Failures are isolated per slot: a request that exhausts its retries
    /// or fails validation produces an `Err` in its own slot and has no
    /// effect on its siblings.
    pub async fn process_batch(
        &self,
        requests: Vec<RequestEnvelope>,
    ) -> Vec<Result<ResponseEnvelope, Error>> {
        let total = requests.len();
        let semaphore = Arc::new(Semaphore::new(self.config().max_concurrent_requests));
        tracing::info!(
            total,
            max_concurrent_requests = self.config().max_concurrent_requests,
            "dispatching batch"
        );

        let mut join_set = JoinSet::new();
        for (index, envelope) in requests.into_iter().enumerate() {
            let client = self.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => client.send(&envelope).await,
                    // The semaphore lives as long as this task, so this is
                    // unreachable in practice.
                    Err(e) => Err(Error::new(ErrorDetails::InternalError {
                        message: format!("concurrency semaphore closed: {e}"),
                    })),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<ResponseEnvelope, Error>>> =
            (0..total).map(|_| None).collect();
        let mut failed = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if result.is_err() {
                        failed += 1;
                    }
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(result);
                    }
                }
                Err(e) => {
                    // The slot stays empty and is reported below; we can't
                    // know which index a panicked task held.
                    tracing::error!("batch worker panicked or was cancelled: {e}");
                    failed += 1;
                }
            }
        }
        tracing::info!(total, failed, "batch complete");

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(Error::new(ErrorDetails::InternalError {
                        message: "batch worker terminated without producing a result".to_string(),
                    }))
                })
            })
            .collect()
    }
}
