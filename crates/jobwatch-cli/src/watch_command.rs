use std::{io, process::ExitCode, sync::Arc};

use anyhow::{bail, Context, Result};
use jobwatch_client::{HttpJobStore, HttpJobStoreConfig, PushChannelConfig, WebSocketPushChannel};
use jobwatch_core::{DisabledPushChannel, PushChannel};
use jobwatch_observer::{
    AttachOptions, JobCompletion, JobFailure, JobObserver, ObserverCallbacks, ProgressUpdate,
};
use tokio::sync::mpsc;

use crate::cli_args::{Cli, WatchArgs};
use crate::render::Renderer;

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug)]
enum WatchEvent {
    Progress(ProgressUpdate),
    Completed(JobCompletion),
    Failed(JobFailure),
}

pub(crate) async fn run_watch(cli: &Cli, args: &WatchArgs) -> Result<ExitCode> {
    let store = HttpJobStore::new(HttpJobStoreConfig {
        api_base: cli.api_base.clone(),
        auth_token: cli.auth_token.clone(),
        request_timeout_ms: cli.request_timeout_ms,
    })
    .context("failed to configure job record client")?;
    let push: Arc<dyn PushChannel> = if args.no_push {
        Arc::new(DisabledPushChannel)
    } else {
        let ws_base = match cli.ws_base.as_deref() {
            Some(ws_base) => ws_base.to_string(),
            None => derive_ws_base(&cli.api_base)?,
        };
        Arc::new(WebSocketPushChannel::new(PushChannelConfig {
            ws_base,
            auth_token: cli.auth_token.clone(),
            ..PushChannelConfig::default()
        }))
    };
    let observer = JobObserver::new(Arc::new(store), push, args.observer_config());

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let progress_tx = event_tx.clone();
    let complete_tx = event_tx.clone();
    let callbacks = ObserverCallbacks::new(
        move |completion| {
            let _ = complete_tx.send(WatchEvent::Completed(completion));
        },
        move |failure| {
            let _ = event_tx.send(WatchEvent::Failed(failure));
        },
    )
    .with_progress(move |update| {
        let _ = progress_tx.send(WatchEvent::Progress(update.clone()));
    });
    let handle = observer
        .attach_with_options(
            &args.job_id,
            callbacks,
            AttachOptions {
                default_result: args.default_result.clone(),
            },
        )
        .with_context(|| format!("failed to watch job '{}'", args.job_id))?;

    let mut renderer = Renderer::new(io::stdout().lock(), args.json);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(WatchEvent::Progress(update)) => renderer.progress(&update)?,
                Some(WatchEvent::Completed(completion)) => {
                    renderer.completed(&completion)?;
                    return Ok(ExitCode::SUCCESS);
                }
                Some(WatchEvent::Failed(failure)) => {
                    renderer.failed(&failure)?;
                    return Ok(ExitCode::FAILURE);
                }
                None => bail!("observer for job '{}' stopped without an outcome", args.job_id),
            },
            interrupted = &mut interrupt => {
                interrupted.context("failed to listen for ctrl-c")?;
                handle.detach();
                renderer.detached(handle.job_id())?;
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
        }
    }
}

/// Maps `http(s)://host/api` onto `ws(s)://host/api`.
fn derive_ws_base(api_base: &str) -> Result<String> {
    let api_base = api_base.trim();
    if let Some(rest) = api_base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }
    if let Some(rest) = api_base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    bail!("cannot derive a websocket base from '{api_base}'; pass --ws-base")
}
