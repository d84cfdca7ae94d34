use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::dispatch::pipeline::EventPipeline;
use crate::source::{SourceError, UpdateSource};

/// Receive loop for one source.
///
/// Pulls events until `cancel` fires or the source fails fatally. Transient
/// failures are retried after a short pause. The source is always closed on
/// the way out; work already handed to the pipeline keeps running.
pub async fn run_poll_loop(
    mut source: Box<dyn UpdateSource>,
    pipeline: EventPipeline,
    cancel: CancellationToken,
    name: &str,
) -> Result<(), SourceError> {
    log::info!("Receive loop for {} started", name);

    let result = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            next = source.next_event() => next,
        };

        match next {
            Ok(Some(event)) => {
                if !pipeline.submit(event, &cancel).await {
                    break Ok(());
                }
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => break Err(e),
            Err(e) => {
                log::warn!("Receive loop for {}: {}, retrying", name, e);
                tokio::select! {
                    _ = cancel.cancelled() => break Ok(()),
                    _ = tokio::time::sleep(config::polling::error_backoff()) => {}
                }
            }
        }
    };

    source.close().await;
    match &result {
        Ok(()) => log::info!("Receive loop for {} stopped", name),
        Err(e) => log::error!("Receive loop for {} failed: {}", name, e),
    }
    result
}
