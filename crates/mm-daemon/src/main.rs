//! mmsearchd: background daemon for multimodal search.
//!
//! Provides:
//! - Unix socket server speaking the newline-delimited JSON admin protocol
//! - the Orchestrator draining the ingest TaskQueue
//! - directory watching feeding the TaskQueue from filesystem events

use anyhow::{Context, Result};
use clap::Parser;
use mm_daemon::{default_config_path, default_pid_path, default_socket_path, load_config, Config};
use mm_daemon::{FileWatcher, Orchestrator, Request, Response, Services};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Parser)]
#[command(name = "mmsearchd")]
#[command(about = "mmsearchd - background service for multimodal semantic search")]
#[command(version)]
struct Args {
    /// Run in foreground (don't daemonize)
    #[arg(long)]
    foreground: bool,

    /// Socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Data directory (catalog.db, vectors.db, model cache)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// PID file path
    #[arg(long)]
    pid: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = default_config_path()?;
    let mut config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "Failed to load config from {}: {}. Using defaults.",
                config_path.display(),
                err
            );
            Config::default()
        }
    };
    if let Some(data_dir) = &args.data_dir {
        std::env::set_var("DATA_DIR", data_dir);
    }

    let socket_path = args
        .socket
        .or_else(|| config.daemon_socket_path())
        .unwrap_or_else(|| default_socket_path(&config));
    let pid_path = args.pid.unwrap_or_else(|| default_pid_path(&config));
    config.daemon.get_or_insert_with(Default::default).socket = Some(socket_path.clone());

    if args.foreground {
        tracing_subscriber::fmt().with_writer(std::io::stderr).init();
        run_daemon(&socket_path, &pid_path, config)
    } else {
        daemonize(&socket_path, &pid_path, config)
    }
}

/// Detach from the controlling terminal the way a classic Unix daemon does:
/// double-fork, new session, stdio to /dev/null, logs to a file.
fn daemonize(socket_path: &Path, pid_path: &Path, config: Config) -> Result<()> {
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create PID directory")?;
    }

    match unsafe { libc::fork() } {
        -1 => anyhow::bail!("Fork failed"),
        0 => {}
        _ => std::process::exit(0),
    }

    if unsafe { libc::setsid() } == -1 {
        anyhow::bail!("setsid failed");
    }

    match unsafe { libc::fork() } {
        -1 => anyhow::bail!("Second fork failed"),
        0 => {}
        _ => std::process::exit(0),
    }

    std::env::set_current_dir("/").ok();

    let dev_null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("Failed to open /dev/null")?;

    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::dup2(dev_null.as_raw_fd(), libc::STDIN_FILENO);
        libc::dup2(dev_null.as_raw_fd(), libc::STDOUT_FILENO);
        libc::dup2(dev_null.as_raw_fd(), libc::STDERR_FILENO);
    }

    let log_dir = pid_path.parent().unwrap_or(Path::new("/tmp"));
    let log_path = log_dir.join("mmsearchd.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    run_daemon(socket_path, pid_path, config)
}

fn run_daemon(socket_path: &Path, pid_path: &Path, config: Config) -> Result<()> {
    let pid = std::process::id();
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    std::fs::write(pid_path, pid.to_string()).context("Failed to write PID file")?;

    tracing::info!("mmsearchd starting (pid: {})", pid);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let result = rt.block_on(async_main(socket_path, config));

    std::fs::remove_file(pid_path).ok();
    result
}

async fn async_main(socket_path: &Path, config: Config) -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

    let services = Services::open(config)?;

    let orchestrator = Orchestrator::new(Arc::clone(&services));
    let shutdown = orchestrator.shutdown_handle();
    let orchestrator_handle = tokio::spawn(async move { orchestrator.run().await });

    let watcher_handle = spawn_watcher(Arc::clone(&services));

    tokio::select! {
        result = serve(socket_path, Arc::clone(&services)) => {
            result?;
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, shutting down");
        }
        _ = sighup.recv() => {
            tracing::info!("Received SIGHUP, shutting down");
        }
    }

    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    watcher_handle.abort();
    let _ = orchestrator_handle.await;

    std::fs::remove_file(socket_path).ok();
    tracing::info!("mmsearchd stopped");
    Ok(())
}

/// Binds the admin socket and serves one task per connection, each reading
/// newline-delimited JSON requests and writing newline-delimited JSON
/// responses until the peer disconnects.
async fn serve(socket_path: &Path, services: Arc<Services>) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path).ok();
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("failed to bind socket at {}", socket_path.display()))?;

    // Restrict to the owning user; the socket otherwise inherits umask.
    set_socket_permissions(socket_path);

    tracing::info!(path = %socket_path.display(), "listening on admin socket");

    loop {
        let (stream, _addr) = listener.accept().await?;
        let services = Arc::clone(&services);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, services).await {
                tracing::warn!(error = %e, "connection ended with an error");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, services: Arc<Services>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                let services = Arc::clone(&services);
                tokio::task::spawn_blocking(move || services.dispatch(req))
                    .await
                    .unwrap_or_else(|e| Response::error("internal_error", e.to_string()))
            }
            Err(e) => Response::error("bad_request", e.to_string()),
        };

        let mut payload = serde_json::to_string(&response).unwrap_or_else(|e| {
            serde_json::to_string(&Response::error("internal_error", e.to_string()))
                .expect("fallback error response is always serializable")
        });
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }
}

/// Polls the configured watch list on a fixed interval, turning debounced
/// filesystem events into `ingest_file` tasks.
fn spawn_watcher(services: Arc<Services>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let dirs = services.config.watched_dirs();
        if dirs.is_empty() {
            return;
        }

        let debounce = std::time::Duration::from_millis(services.config.watch_debounce_ms());
        let mut watcher = match FileWatcher::with_debounce(debounce, Some(services.data_dir.clone())) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start file watcher");
                return;
            }
        };
        for dir in &dirs {
            if let Err(e) = watcher.watch(dir) {
                tracing::warn!(path = %dir.display(), error = %e, "failed to watch directory");
            }
        }

        loop {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            for event in watcher.poll_events() {
                if matches!(event.kind, mm_daemon::FileEventKind::Deleted) {
                    continue;
                }
                let priority = mm_core::model::default_priority_for_modality(mm_core::Modality::Text);
                if let Err(e) =
                    services
                        .task_queue
                        .enqueue(mm_core::TaskKind::IngestFile, &event.path.to_string_lossy(), priority, vec![])
                {
                    tracing::warn!(path = %event.path.display(), error = %e, "failed to enqueue watched file");
                }
            }
        }
    })
}
