//! Engine host loop.
//!
//! The engine itself is single-threaded and synchronous; this module drives
//! it in the canonical loop: compute the next alarm, block on the earliest
//! of alarm expiry / kernel notification / child exit / control request,
//! deliver the matching callback, then drain ready delays into child
//! processes.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};

use syncline_core::{Clock, Config, Engine, EngineError, MonotonicClock, Pid};

use crate::backend::{NotifyBackend, ProcessTable};
use crate::error::{io_err, DaemonError};
use crate::events::{translate, Translation};
use crate::paths::{socket_path, syncline_root};
use crate::protocol::{DaemonCommand, DaemonReply};

/// Request routed from a socket client to the engine task.
enum ControlRequest {
    Status { respond_to: oneshot::Sender<String> },
}

/// Load tracing, build the runtime, and block until the daemon exits.
pub fn start_blocking(home: &Path, config_path: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let config = syncline_core::config::load(config_path)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf, config: Config) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
    let (exit_tx, exit_rx) = mpsc::unbounded_channel::<(Pid, i32)>();
    let (control_tx, control_rx) = mpsc::channel::<ControlRequest>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let clock = Arc::new(MonotonicClock::new());
    let backend = NotifyBackend::new(event_tx)?;
    let engine = Engine::new(config, clock.clone());
    let table = ProcessTable::new();

    let engine_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = engine_task(
                engine,
                backend,
                table,
                clock,
                event_rx,
                exit_rx,
                exit_tx,
                control_rx,
                shutdown.subscribe(),
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(home, control_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (engine_result, socket_result, signal_result) =
        tokio::join!(engine_handle, socket_handle, signal_handle);

    for (task, joined) in [
        ("engine", engine_result),
        ("socket server", socket_result),
        ("signal handler", signal_result),
    ] {
        joined.map_err(|err| DaemonError::Protocol(format!("{task} task panicked: {err}")))??;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn engine_task(
    mut engine: Engine,
    mut backend: NotifyBackend,
    mut table: ProcessTable,
    clock: Arc<MonotonicClock>,
    mut event_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    mut exit_rx: mpsc::UnboundedReceiver<(Pid, i32)>,
    exit_tx: mpsc::UnboundedSender<(Pid, i32)>,
    mut control_rx: mpsc::Receiver<ControlRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // Watches go live before the startup commands run, so changes made
    // during bulk initial synchronization are already captured.
    engine.arm_watches(&mut backend);
    engine.run_startup(&mut table)?;
    info!("startup phase complete, entering normal operation");

    loop {
        let until_alarm = engine
            .next_alarm()
            .map(|alarm| alarm.saturating_duration_since(clock.now()));

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_event = event_rx.recv() => {
                let Some(result) = maybe_event else { break };
                match result {
                    Ok(event) => handle_notify_event(&mut engine, &mut backend, &clock, event)?,
                    Err(err) => warn!(error = %err, "watcher error"),
                }
            }
            maybe_exit = exit_rx.recv() => {
                let Some((pid, code)) = maybe_exit else { break };
                engine.on_child_exit(pid, code);
            }
            maybe_request = control_rx.recv() => {
                let Some(request) = maybe_request else { break };
                match request {
                    ControlRequest::Status { respond_to } => {
                        let _ = respond_to.send(render_status(&engine));
                    }
                }
            }
            _ = sleep_until_alarm(until_alarm) => {}
        }

        drive(&mut engine, clock.as_ref(), &mut table, &exit_tx);
    }

    Ok(())
}

/// Deliver one notify event to the engine, split per watched directory.
fn handle_notify_event(
    engine: &mut Engine,
    backend: &mut NotifyBackend,
    clock: &MonotonicClock,
    event: notify::Event,
) -> Result<(), DaemonError> {
    match translate(&event) {
        Translation::Overflow => {
            error!("kernel event queue overflowed, terminating");
            Err(EngineError::Overflow.into())
        }
        Translation::Ignore => Ok(()),
        Translation::Deliver(events) => {
            let now = clock.now();
            for raw in events {
                let Some(wd) = backend.wd_for_dir(&raw.dir) else {
                    info!(dir = %raw.dir.display(), name = %raw.name, "event for unwatched directory dropped");
                    continue;
                };
                engine.on_kernel_event(
                    backend,
                    syncline_core::KernelEvent {
                        kind: raw.kind,
                        wd,
                        isdir: raw.isdir,
                        time: Some(now),
                        name: raw.name,
                        name2: raw.name2,
                    },
                );
            }
            Ok(())
        }
    }
}

/// Drain every delay that is ready right now, then hand the spawned
/// children to blocking reaper tasks.
fn drive(
    engine: &mut Engine,
    clock: &dyn Clock,
    table: &mut ProcessTable,
    exit_tx: &mpsc::UnboundedSender<(Pid, i32)>,
) {
    while engine.tick(clock.now(), table) {}

    for (pid, mut child) in table.drain() {
        let exit_tx = exit_tx.clone();
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.code().unwrap_or(-1),
                Err(err) => {
                    error!(pid = %pid, error = %err, "wait on child failed");
                    -1
                }
            };
            let _ = exit_tx.send((pid, code));
        });
    }
}

async fn sleep_until_alarm(until: Option<Duration>) {
    match until {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

fn render_status(engine: &Engine) -> String {
    let mut out = Vec::new();
    if let Err(err) = engine.status_report(&mut out) {
        return format!("status report failed: {err}");
    }
    String::from_utf8_lossy(&out).into_owned()
}

async fn socket_server_task(
    home: PathBuf,
    control_tx: mpsc::Sender<ControlRequest>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    let listener = bind_control_socket(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let control_tx = control_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, control_tx, shutdown_tx).await {
                        error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

/// Bind the control socket, reclaiming a leftover socket file from an
/// unclean shutdown.
///
/// Nothing supervises or restarts this daemon, so a socket file nobody
/// answers on is always ours to delete; one that still accepts connections
/// means a second daemon owns this home, which is fatal. The socket is
/// owner-only: anyone who can write it can stop the daemon.
fn bind_control_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "another daemon is already listening on {}",
                socket.display()
            )));
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(_) => {
            warn!(socket = %socket.display(), "reclaiming stale control socket");
            match fs::remove_file(socket) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(socket, err)),
            }
        }
    }

    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(socket, fs::Permissions::from_mode(0o600))
            .map_err(|e| io_err(socket, e))?;
    }
    Ok(listener)
}

async fn handle_socket_client(
    stream: UnixStream,
    control_tx: mpsc::Sender<ControlRequest>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<DaemonCommand>(&line) {
            Err(err) => DaemonReply::Error {
                message: format!("invalid request: {err}"),
            },
            Ok(DaemonCommand::Status) => {
                let (respond_to, report) = oneshot::channel();
                if control_tx
                    .send(ControlRequest::Status { respond_to })
                    .await
                    .is_err()
                {
                    DaemonReply::Error {
                        message: "engine is shutting down".to_string(),
                    }
                } else {
                    match report.await {
                        Ok(report) => DaemonReply::Status { report },
                        Err(_) => DaemonReply::Error {
                            message: "engine did not answer status request".to_string(),
                        },
                    }
                }
            }
            Ok(DaemonCommand::Stop) => {
                let _ = shutdown_tx.send(());
                DaemonReply::Stopping
            }
        };

        let stopping = matches!(reply, DaemonReply::Stopping);
        write_reply(&mut writer, &reply).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

async fn write_reply(writer: &mut OwnedWriteHalf, reply: &DaemonReply) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(reply)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = syncline_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::sync::{broadcast, mpsc};

    use super::*;

    #[test]
    fn runtime_dirs_are_created_once() {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("create dirs");
        assert!(syncline_root(home.path()).is_dir());
        ensure_runtime_dirs(home.path()).expect("idempotent");
    }

    #[tokio::test]
    async fn stale_socket_file_is_reclaimed_on_bind() {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("create dirs");
        let socket = socket_path(home.path());
        fs::write(&socket, b"").expect("plant stale socket file");

        let listener = bind_control_socket(&socket).expect("stale socket reclaimed");
        drop(listener);
        assert!(socket.exists(), "a live socket replaced the stale file");
    }

    #[tokio::test]
    async fn live_socket_refuses_a_second_daemon() {
        let home = TempDir::new().expect("home");
        ensure_runtime_dirs(home.path()).expect("create dirs");
        let socket = socket_path(home.path());

        let _listener = bind_control_socket(&socket).expect("first bind");
        let second = bind_control_socket(&socket);
        assert!(
            matches!(second, Err(DaemonError::Protocol(_))),
            "a listening socket must not be reclaimed"
        );
    }

    #[tokio::test]
    async fn socket_client_answers_status_and_stop() {
        let (client, server) = UnixStream::pair().expect("socket pair");
        let (control_tx, mut control_rx) = mpsc::channel::<ControlRequest>(4);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        // Engine stand-in answering status requests.
        tokio::spawn(async move {
            while let Some(ControlRequest::Status { respond_to }) = control_rx.recv().await {
                let _ = respond_to.send("Watching 0 directories\n".to_string());
            }
        });

        let handler = tokio::spawn(handle_socket_client(server, control_tx, shutdown_tx));

        let (read_half, mut write_half) = client.into_split();
        let mut replies = BufReader::new(read_half).lines();

        let mut line = serde_json::to_string(&DaemonCommand::Status).expect("encode status");
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.expect("send status");
        let reply: DaemonReply =
            serde_json::from_str(&replies.next_line().await.expect("read").expect("reply line"))
                .expect("decode reply");
        match reply {
            DaemonReply::Status { report } => {
                assert!(report.contains("Watching"), "report: {report}")
            }
            other => panic!("expected a status reply, got {other:?}"),
        }

        let mut line = serde_json::to_string(&DaemonCommand::Stop).expect("encode stop");
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.expect("send stop");
        let reply: DaemonReply =
            serde_json::from_str(&replies.next_line().await.expect("read").expect("reply line"))
                .expect("decode reply");
        assert_eq!(reply, DaemonReply::Stopping);

        shutdown_rx.recv().await.expect("shutdown broadcast");
        handler.await.expect("join").expect("handler result");
    }

    #[tokio::test]
    async fn unknown_verbs_get_an_error_reply() {
        let (client, server) = UnixStream::pair().expect("socket pair");
        let (control_tx, _control_rx) = mpsc::channel::<ControlRequest>(4);
        let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

        tokio::spawn(handle_socket_client(server, control_tx, shutdown_tx));

        let (read_half, mut write_half) = client.into_split();
        let mut replies = BufReader::new(read_half).lines();
        write_half
            .write_all(b"\"restart\"\n")
            .await
            .expect("send bad verb");
        let reply: DaemonReply =
            serde_json::from_str(&replies.next_line().await.expect("read").expect("reply line"))
                .expect("decode reply");
        assert!(matches!(reply, DaemonReply::Error { .. }));
    }
}
