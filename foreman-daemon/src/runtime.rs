use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};

use foreman_engine::{Coordinator, FileStateStore};

use crate::error::{io_err, DaemonError};
use crate::facade::Facade;
use crate::paths::{
    foreman_root, knowledge_path, logs_dir, run_dir, socket_path, state_dir, AGING_INTERVAL,
    KNOWLEDGE_FLUSH_INTERVAL, SWEEP_INTERVAL,
};
use crate::protocol::{OpRequest, OpResponse};

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, repo_root: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), repo_root.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf, repo_root: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let coordinator = Arc::new(RwLock::new(Coordinator::new(Box::new(
        FileStateStore::new(state_dir(&home)),
    ))));
    let facade = Arc::new(Facade::new(coordinator.clone(), repo_root));
    let started_at_unix = unix_seconds_now();

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let facade = facade.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                facade,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let sweep_handle = {
        let shutdown = shutdown_tx.clone();
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let result = sweep_task(coordinator, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let aging_handle = {
        let shutdown = shutdown_tx.clone();
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let result = aging_task(coordinator, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let flush_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let result = knowledge_flush_task(home, coordinator, shutdown.subscribe()).await;
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
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, sweep_result, aging_result, flush_result, signal_result) = tokio::join!(
        socket_handle,
        sweep_handle,
        aging_handle,
        flush_handle,
        signal_handle
    );

    handle_join("socket_server", socket_result)?;
    handle_join("health_sweep", sweep_result)?;
    handle_join("queue_aging", aging_result)?;
    handle_join("knowledge_flush", flush_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    facade: Arc<Facade>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let facade = facade.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, home, facade, shutdown_tx, started_at_unix).await
                    {
                        tracing::error!(error = %err, "socket client error");
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

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    facade: Arc<Facade>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
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

        let request: Result<OpRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &OpResponse::error("validation", format!("invalid request JSON: {err}"), ""),
                )
                .await?;
                continue;
            }
        };

        let op = request.op.clone();
        let response = match op.as_str() {
            "status" => {
                let payload =
                    build_status_payload(&home, facade.coordinator(), started_at_unix).await;
                OpResponse::ok(payload)
            }
            "shutdown" => {
                let _ = shutdown_tx.send(());
                OpResponse::ok(json!({ "stopping": true }))
            }
            _ => facade.dispatch(&op, request.args).await,
        };

        write_response(&mut writer, &response).await?;
        if op == "shutdown" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(
    home: &Path,
    coordinator: Arc<RwLock<Coordinator>>,
    started_at_unix: u64,
) -> Value {
    let (agents, tasks, pending) = {
        let coordinator = coordinator.read().await;
        let health = coordinator.system_health();
        (health.agents.total, health.tasks.total, health.tasks.pending)
    };

    json!({
        "running": true,
        "started_at_unix": started_at_unix,
        "agents": agents,
        "tasks": tasks,
        "pending_tasks": pending,
        "socket": socket_path(home).display().to_string(),
        "state_dir": state_dir(home).display().to_string(),
    })
}

async fn sweep_task(
    coordinator: Arc<RwLock<Coordinator>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let report = {
                    let mut coordinator = coordinator.write().await;
                    coordinator.sweep_agents()
                };
                if !report.failed.is_empty() || !report.reactivated.is_empty() {
                    tracing::info!(
                        failed = report.failed.len(),
                        reactivated = report.reactivated.len(),
                        "health sweep acted"
                    );
                }
            }
        }
    }
    Ok(())
}

async fn aging_task(
    coordinator: Arc<RwLock<Coordinator>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(AGING_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let boosted = {
                    let mut coordinator = coordinator.write().await;
                    coordinator.age_pending_tasks()
                };
                if boosted > 0 {
                    tracing::info!(boosted, "aging pass boosted stale tasks");
                }
            }
        }
    }
    Ok(())
}

async fn knowledge_flush_task(
    home: PathBuf,
    coordinator: Arc<RwLock<Coordinator>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(KNOWLEDGE_FLUSH_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let snapshot = {
                    let coordinator = coordinator.read().await;
                    coordinator.knowledge().clone()
                };
                if let Err(err) = write_knowledge_snapshot(&home, &snapshot) {
                    tracing::warn!(error = %err, "knowledge flush failed");
                }
            }
        }
    }

    // Final flush so a clean shutdown never loses learned durations.
    let snapshot = {
        let coordinator = coordinator.read().await;
        coordinator.knowledge().clone()
    };
    if let Err(err) = write_knowledge_snapshot(&home, &snapshot) {
        tracing::warn!(error = %err, "final knowledge flush failed");
    }
    Ok(())
}

fn write_knowledge_snapshot(
    home: &Path,
    knowledge: &foreman_core::types::KnowledgeBase,
) -> Result<(), DaemonError> {
    let target = knowledge_path(home);
    let tmp = target.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(knowledge)?;
    fs::write(&tmp, payload).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, &target).map_err(|e| io_err(&target, e))?;
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [foreman_root(home), run_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &OpResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
