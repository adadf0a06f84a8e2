//! `serve`: HTTP API, optionally with an in-process watcher.

use tokio_util::sync::CancellationToken;

use super::{open_recorder, watch_target, CommandError};
use crate::config::RecorderConfig;
use crate::server::{AppState, RecorderServer};
use crate::source::{LogWatcher, RecorderReplaySink, RecorderSink, ReplayClient, ReplayQueue};

/// Run the server until `cancel` fires.
///
/// With `with_watcher` the configured log is tailed into the same recorder,
/// and its status is reported by `/api/status`. A configured replay queue
/// is then imported in-process too; in replay mode the log is not tailed.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the server fails to bind.
pub async fn serve(
    config: RecorderConfig,
    with_watcher: bool,
    cancel: CancellationToken,
) -> Result<(), CommandError> {
    let recorder = open_recorder(&config).await?;
    let replay_client = ReplayClient::new()?;
    let mut state =
        AppState::new(recorder.clone(), replay_client.clone()).with_cancel(cancel.clone());

    let queue_task = match config.watcher.replay_queue(&config.data_dir()) {
        Some(path) if with_watcher => {
            let sink = RecorderReplaySink::new(recorder.clone(), replay_client);
            let queue = ReplayQueue::new(path, sink).with_cancel(cancel.child_token());
            Some(tokio::spawn(queue.run()))
        }
        _ => None,
    };

    let watcher_task = if with_watcher && !config.watcher.replay_mode {
        let target = watch_target(&config);
        let watcher = LogWatcher::new(
            config.watcher.watcher_config(target),
            RecorderSink::new(recorder),
        )
        .with_cancel(cancel.child_token());
        state = state.with_watcher_status(watcher.subscribe());
        Some(tokio::spawn(watcher.run()))
    } else {
        None
    };

    let result = RecorderServer::new(state)
        .with_config(config.server)
        .run()
        .await;

    cancel.cancel();
    if let Some(task) = watcher_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Watcher task failed");
        }
    }
    if let Some(task) = queue_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Replay queue task failed");
        }
    }

    result?;
    Ok(())
}
