//! Daemon runtime: heartbeat timer, shared-state watcher, control socket.
//!
//! One tokio task per concern, tied together by a broadcast shutdown
//! channel; any task exiting brings the whole daemon down cleanly.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use flotilla_core::{config, heartbeat as hb_store};
use flotilla_sync::{HeartbeatDelta, Services, SyncEventOptions};

use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    let services = Arc::new(Services::build(&home, config, None)?);
    ensure_runtime_dirs(&home, &services)?;
    let started_at_unix = unix_seconds_now();

    let (check_tx, check_rx) = mpsc::channel::<&'static str>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let heartbeat_handle = {
        let shutdown = shutdown_tx.clone();
        let services = services.clone();
        tokio::spawn(async move {
            let result = heartbeat_task(services, check_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let services = services.clone();
        let check_tx = check_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(services, check_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let services = services.clone();
        let check_tx = check_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                services,
                check_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
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
                        Err(err) => Err(DaemonError::Protocol(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    let (heartbeat_result, watcher_result, socket_result, signal_result) = tokio::join!(
        heartbeat_handle,
        watcher_handle,
        socket_handle,
        signal_handle
    );

    handle_join("heartbeat", heartbeat_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Timer-driven heartbeat cycle. External triggers (watcher, socket
/// `check`) funnel through the same path; the tracker's own guard keeps a
/// slow cycle from running twice.
async fn heartbeat_task(
    services: Arc<Services>,
    mut check_rx: mpsc::Receiver<&'static str>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(services.config.heartbeat.interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let source = tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => "timer",
            trigger = check_rx.recv() => {
                let Some(trigger) = trigger else { break };
                trigger
            }
        };

        if let Err(err) = run_cycle(&services, source).await {
            tracing::error!(error = %err, source, "heartbeat cycle failed");
        }
    }

    Ok(())
}

async fn run_cycle(services: &Arc<Services>, source: &str) -> Result<(), DaemonError> {
    // Register our own liveness first so a fresh daemon flips itself back
    // online before evaluating the fleet.
    {
        let services = services.clone();
        tokio::task::spawn_blocking(move || {
            services
                .tracker
                .register_heartbeat(&services.config.machine_id, None)
        })
        .await
        .map_err(|err| DaemonError::Protocol(format!("register join error: {err}")))??;
    }

    let delta = services.tracker.check_heartbeats(false).await?;
    let Some(delta) = delta else {
        tracing::debug!(source, "check cycle already running; tick skipped");
        return Ok(());
    };
    if delta.is_empty() {
        return Ok(());
    }

    let services = services.clone();
    tokio::task::spawn_blocking(move || handle_transitions(&services, &delta))
        .await
        .map_err(|err| DaemonError::Protocol(format!("transition join error: {err}")))?
}

/// Feed tracker transitions to the sync event handler.
///
/// Offline events are handled for every machine (baseline backup + audit
/// entry are machine-agnostic). Online reconcile writes into the local
/// config root, so it only runs for this daemon's own machine; peer online
/// transitions are logged and left to the peer's daemon.
fn handle_transitions(services: &Services, delta: &HeartbeatDelta) -> Result<(), DaemonError> {
    for machine in &delta.newly_offline {
        match services
            .events
            .handle_offline(machine, &SyncEventOptions::default())
        {
            Ok(report) => tracing::info!(
                machine = %machine,
                backup = report.backup_path.is_some(),
                "offline event handled",
            ),
            Err(err) => tracing::error!(machine = %machine, error = %err, "offline event failed"),
        }
    }

    for machine in &delta.newly_online {
        if machine != &services.config.machine_id {
            tracing::info!(machine = %machine, "peer back online; its daemon reconciles locally");
            continue;
        }
        match services
            .events
            .handle_online(machine, &SyncEventOptions::default())
        {
            Ok(report) => tracing::info!(
                machine = %machine,
                offline_duration_secs = report.offline_duration_secs,
                files_synced = report.files_synced,
                "online event handled",
            ),
            Err(err) => tracing::error!(machine = %machine, error = %err, "online event failed"),
        }
    }

    for machine in &delta.warning {
        tracing::warn!(machine = %machine, "machine is missing heartbeats");
    }
    Ok(())
}

/// Watch the shared heartbeat directory so peer heartbeats trigger prompt
/// checks instead of waiting for the next timer tick.
async fn watcher_task(
    services: Arc<Services>,
    check_tx: mpsc::Sender<&'static str>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let heartbeats = flotilla_core::paths::heartbeats_dir(&services.shared);
    if !heartbeats.exists() {
        fs::create_dir_all(&heartbeats).map_err(|e| io_err(&heartbeats, e))?;
    }
    let heartbeats = fs::canonicalize(&heartbeats).unwrap_or(heartbeats);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut _watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    _watcher.watch(&heartbeats, RecursiveMode::NonRecursive)?;

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }

                for path in event.paths {
                    if !is_heartbeat_json(&path) {
                        continue;
                    }
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    if check_tx.send("watcher").await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    services: Arc<Services>,
    check_tx: mpsc::Sender<&'static str>,
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

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let services = services.clone();
                let check_tx = check_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        services,
                        check_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
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
    services: Arc<Services>,
    check_tx: mpsc::Sender<&'static str>,
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

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => {
                let payload = build_status_payload(&services, started_at_unix).await;
                DaemonResponse::ok(payload)
            }
            "check" => match check_tx.send("socket").await {
                Ok(()) => DaemonResponse::ok(json!({ "check_queued": true })),
                Err(_) => DaemonResponse::error("heartbeat task is gone"),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(services: &Arc<Services>, started_at_unix: u64) -> Value {
    let shared = services.shared.clone();
    let records = tokio::task::spawn_blocking(move || hb_store::list_records_at(&shared))
        .await
        .ok()
        .and_then(|result| result.ok())
        .unwrap_or_default();

    let machines: Vec<Value> = records
        .iter()
        .map(|record| {
            json!({
                "machine_id": record.machine_id.0,
                "status": record.status,
                "last_heartbeat": record.last_heartbeat,
                "missed_heartbeats": record.missed_heartbeats,
                "offline_since": record.offline_since,
            })
        })
        .collect();

    json!({
        "running": true,
        "machine_id": services.config.machine_id.0,
        "started_at_unix": started_at_unix,
        "shared": services.shared.display().to_string(),
        "machines": machines,
    })
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn is_heartbeat_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path, services: &Services) -> Result<(), DaemonError> {
    let heartbeats = flotilla_core::paths::heartbeats_dir(&services.shared);
    if !heartbeats.exists() {
        fs::create_dir_all(&heartbeats).map_err(|e| io_err(&heartbeats, e))?;
    }
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
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

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
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

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
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
