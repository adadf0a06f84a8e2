//! `watch`: tail a log and push each line to a running server.

use tokio_util::sync::CancellationToken;

use super::{watch_target, CommandError};
use crate::config::RecorderConfig;
use crate::source::{HttpLineSink, HttpReplaySink, LogWatcher, ReplayQueue};

/// Tail the configured log until `cancel` fires.
///
/// Lines that fail to deliver stay unread and are retried on the next poll.
/// A configured replay queue is polled alongside; in replay mode it is the
/// only thing watched.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub async fn watch(config: RecorderConfig, cancel: CancellationToken) -> Result<(), CommandError> {
    let queue_task = match config.watcher.replay_queue(&config.data_dir()) {
        Some(path) => {
            let sink = HttpReplaySink::new(config.watcher.replay_api_url.clone())?;
            tracing::info!(queue = %path.display(), api_url = %sink.url(), "Pushing queued replays");
            let queue = ReplayQueue::new(path, sink).with_cancel(cancel.child_token());
            if config.watcher.replay_mode {
                queue.run().await;
                return Ok(());
            }
            Some(tokio::spawn(queue.run()))
        }
        None => None,
    };

    let target = watch_target(&config);
    let sink = HttpLineSink::new(config.watcher.api_url.clone())?;
    tracing::info!(api_url = %sink.url(), "Pushing tailed lines");

    LogWatcher::new(config.watcher.watcher_config(target), sink)
        .with_cancel(cancel.clone())
        .run()
        .await;

    cancel.cancel();
    if let Some(task) = queue_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Replay queue task failed");
        }
    }
    Ok(())
}
