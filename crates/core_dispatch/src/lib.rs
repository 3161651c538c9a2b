//! Dispatcher (D), `spec.md` §4.3.
//!
//! One instance of [`handle_connection`] runs per accepted TCP stream.
//! It owns the handshake, then splits into a read loop (decodes status
//! frames, updates R and Q, writes audit rows) and a write loop (claims
//! from Q, writes dispatch frames), plus a heartbeat ticker. The three
//! tasks share only the codec's write mutex and the atomic session
//! state word in [`session::AtomicSessionState`]. The read loop runs on
//! its own task so the heartbeat loop can abort it directly — a worker
//! that stops answering pings but leaves the TCP connection open must
//! not be able to block cleanup forever inside a blocking `read_frame`.

pub mod error;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use core_db::NewWorkerLog;
use core_protocol::{
    read_frame, read_upgrade_request, rejection_response, switching_protocols_response,
    DispatchMessage, FrameWriter, Opcode, Role, StatusMessage, WorkerHealth, WorkerStatus,
};
use core_queue::JobQueue;
use core_registry::WorkerRegistry;
use sqlx::PgPool;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use error::DispatchError;
use session::{AtomicSessionState, SessionState};

/// 30 s heartbeat cadence (`spec.md` §4.1/§5).
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Three missed pongs tears the session down (`spec.md` §3).
const MAX_MISSED_PONGS: u32 = 3;
/// How often the write loop polls Q when no notification has arrived.
const WRITE_LOOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shared dependencies every session needs; constructed once in the
/// binary and cloned (cheaply, via `Arc`) per accepted connection.
#[derive(Clone)]
pub struct DispatcherContext {
    pub pool: PgPool,
    pub queue: Arc<JobQueue>,
    pub registry: Arc<WorkerRegistry>,
}

/// Drives one worker connection end to end: handshake, then read/write
/// loops and heartbeat until the session terminates.
pub async fn handle_connection<S>(stream: S, ctx: DispatcherContext) -> Result<(), DispatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut write_half) = split(stream);
    let mut read_half = read_half;

    let upgrade = match read_upgrade_request(&mut read_half).await {
        Ok(req) => req,
        Err(err) => {
            let body = rejection_response(err.status_code(), "rejected");
            let _ = write_half.write_all(body.as_bytes()).await;
            return Err(err.into());
        }
    };

    let token_row = core_db::queries::find_valid_token(&ctx.pool, &upgrade.token).await?;
    if token_row.is_none() {
        let body = rejection_response(401, "invalid token");
        let _ = write_half.write_all(body.as_bytes()).await;
        return Err(core_protocol::HandshakeError::Unauthorized.into());
    }

    let response = switching_protocols_response(&upgrade.key);
    write_half.write_all(response.as_bytes()).await?;

    let identity = upgrade.worker_name.clone();
    // A second handshake for this identity evicts whatever session is
    // currently registered under it (`spec.md` §3); `evicted` fires when
    // *this* session is the one that gets displaced later.
    let mut evicted = ctx.registry.register(&identity).await;
    info!(worker = %identity, "worker session established");

    let writer = FrameWriter::new(write_half, Role::Server);
    let state = Arc::new(AtomicSessionState::new(SessionState::Idle));
    let in_flight = Arc::new(Mutex::new(None::<i32>));
    let missed_pongs = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let mut notify_rx = ctx.queue.subscribe();

    let read_task = {
        let ctx = ctx.clone();
        let writer = writer.clone();
        let state = state.clone();
        let in_flight = in_flight.clone();
        let missed_pongs = missed_pongs.clone();
        let identity = identity.clone();
        tokio::spawn(async move {
            read_loop(read_half, &ctx, &writer, &state, &in_flight, &missed_pongs, &identity).await
        })
    };
    let read_abort: AbortHandle = read_task.abort_handle();

    let heartbeat = tokio::spawn(heartbeat_loop(
        writer.clone(),
        state.clone(),
        missed_pongs.clone(),
        read_abort,
    ));

    let write_loop = tokio::spawn(write_loop(
        ctx.clone(),
        writer.clone(),
        state.clone(),
        in_flight.clone(),
        identity.clone(),
        notify_rx.resubscribe(),
    ));

    let read_result = tokio::select! {
        joined = read_task => match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => {
                warn!(worker = %identity, "read loop aborted after missed heartbeats");
                Err(DispatchError::HeartbeatTimeout(MAX_MISSED_PONGS))
            }
            Err(join_err) => {
                warn!(worker = %identity, error = %join_err, "read loop task panicked");
                Err(DispatchError::TaskPanicked(join_err.to_string()))
            }
        },
        _ = evicted.changed() => {
            info!(worker = %identity, "session evicted by a newer handshake for this identity");
            Err(DispatchError::Evicted)
        }
    };

    state.store(SessionState::Terminated);
    heartbeat.abort();
    write_loop.abort();
    drop(notify_rx);

    let released = ctx.queue.release(&identity).await?;
    if !released.is_empty() {
        debug!(worker = %identity, count = released.len(), "released in-flight entries on session teardown");
    }
    ctx.registry.set_health(&identity, WorkerHealth::Error).await;
    ctx.registry.remove(&identity).await;

    read_result
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut read_half: R,
    ctx: &DispatcherContext,
    writer: &FrameWriter<impl AsyncWrite + Unpin>,
    state: &AtomicSessionState,
    in_flight: &Mutex<Option<i32>>,
    missed_pongs: &std::sync::atomic::AtomicU32,
    identity: &str,
) -> Result<(), DispatchError> {
    loop {
        let (opcode, payload) = read_frame(&mut read_half, Role::Server).await?;
        match opcode {
            Opcode::Text => {
                let status: StatusMessage = core_protocol::decode_status_message(&payload)?;
                handle_status_message(ctx, state, in_flight, identity, status).await?;
            }
            Opcode::Pong => {
                missed_pongs.store(0, std::sync::atomic::Ordering::SeqCst);
                ctx.registry.touch_heartbeat(identity).await;
            }
            Opcode::Ping => {
                writer.write_control(Opcode::Pong, &[]).await?;
            }
            Opcode::Close => {
                return Err(DispatchError::PeerClosed);
            }
        }
    }
}

async fn handle_status_message(
    ctx: &DispatcherContext,
    state: &AtomicSessionState,
    in_flight: &Mutex<Option<i32>>,
    identity: &str,
    status: StatusMessage,
) -> Result<(), DispatchError> {
    ctx.registry
        .update_task(
            identity,
            if status.has_task() {
                Some(status.task_id.clone())
            } else {
                None
            },
        )
        .await;
    ctx.registry.touch_heartbeat(identity).await;

    let entry_id = in_flight.lock().await.clone();

    match status.status {
        WorkerStatus::Running => {
            state.store(SessionState::WorkerBusy);
            if let Some(id) = entry_id {
                ctx.queue.mark_running(id).await?;
            }
        }
        WorkerStatus::Completed => {
            if let Some(id) = entry_id {
                ctx.queue.complete(id).await?;
                *in_flight.lock().await = None;
            }
            state.store(SessionState::Idle);
        }
        WorkerStatus::Failed => {
            if let Some(id) = entry_id {
                ctx.queue.fail(id, "worker reported failure").await?;
                *in_flight.lock().await = None;
            }
            state.store(SessionState::Idle);
        }
        WorkerStatus::Idle => {
            state.store(SessionState::Idle);
        }
        WorkerStatus::Disconnected => {
            return Err(DispatchError::PeerClosed);
        }
    }

    // Audit: every status frame with a real task id and not the
    // (idle, "none") resting state produces a worker-log row (`spec.md`
    // §4.3).
    if status.has_task() {
        let log = NewWorkerLog {
            worker: status.worker.clone(),
            task: Some(status.task_id.clone()),
            status: status.status.to_string(),
            hosts: Some(status.hosts.clone()),
            task_template: Some(status.task_template.clone()),
            reporter: Some(status.reporter.clone()),
        };
        core_db::queries::insert_worker_log(&ctx.pool, &log).await?;
    }

    Ok(())
}

async fn write_loop(
    ctx: DispatcherContext,
    writer: FrameWriter<impl AsyncWrite + Unpin>,
    state: Arc<AtomicSessionState>,
    in_flight: Arc<Mutex<Option<i32>>>,
    identity: String,
    mut notify_rx: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = notify_rx.recv() => {}
            _ = tokio::time::sleep(WRITE_LOOP_POLL_INTERVAL) => {}
        }

        if state.load() != SessionState::Idle {
            continue;
        }

        let entry = match ctx.queue.claim_next(&identity).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(worker = %identity, error = %err, "claim_next failed");
                continue;
            }
        };

        let Some(entry) = entry else { continue };

        if !state.compare_store(SessionState::Idle, SessionState::Dispatching) {
            // Lost the race against a status frame that just moved us
            // out of Idle; put the claimed row back and retry later.
            let _ = ctx.queue.fail(entry.id, "claimed while session busy").await;
            continue;
        }

        let params = entry.parameters.as_ref();
        let dispatch = DispatchMessage {
            id: entry.id.to_string(),
            command: param_str(params, "command"),
            args: param_str_array(params, "args"),
            files: Default::default(),
            reporter: entry.reporter.clone().unwrap_or_default(),
            hosts: param_str(params, "hosts"),
            task_template: param_str(params, "task_template"),
        };

        let payload = match core_protocol::encode_dispatch_message(&dispatch) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(worker = %identity, error = %err, "failed to encode dispatch message");
                continue;
            }
        };

        if let Err(err) = writer.write_text(&payload).await {
            warn!(worker = %identity, error = %err, "write_text failed, tearing down write loop");
            return;
        }

        *in_flight.lock().await = Some(entry.id);
        state.store(SessionState::AwaitingStatus);
    }
}

/// Queue `parameters` is opaque JSON supplied by the enqueuer (`spec.md`
/// §3); command/args/hosts/task_template ride inside it the same way
/// `queue.Task`'s fields did in the original in-memory queue.
fn param_str(params: Option<&serde_json::Value>, key: &str) -> String {
    params
        .and_then(|p| p.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn param_str_array(params: Option<&serde_json::Value>, key: &str) -> Vec<String> {
    params
        .and_then(|p| p.get(key))
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

async fn heartbeat_loop(
    writer: FrameWriter<impl AsyncWrite + Unpin>,
    state: Arc<AtomicSessionState>,
    missed_pongs: Arc<std::sync::atomic::AtomicU32>,
    read_abort: AbortHandle,
) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        if state.load() == SessionState::Terminated {
            return;
        }

        let prior = missed_pongs.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if prior > MAX_MISSED_PONGS {
            warn!("missed {prior} consecutive pongs, closing session");
            let _ = writer.close(b"heartbeat timeout").await;
            state.store(SessionState::Terminated);
            // read_loop is blocked inside read_frame waiting on a peer
            // that stopped answering pings but never sent a close frame
            // or dropped the socket; nothing else will ever unblock it.
            read_abort.abort();
            return;
        }

        if writer.write_control(Opcode::Ping, &[]).await.is_err() {
            state.store(SessionState::Terminated);
            read_abort.abort();
            return;
        }
    }
}
