//! Core host entry point (spec §4.1/§4.4): acquire the instance lease, bind
//! a transport, accept connections, and run the automation scheduler until
//! asked to drain.

use kagan_common::DomainEvent;
use kagan_runtime::dispatch::DispatchContext;
use kagan_runtime::events::EventBus;
use kagan_runtime::idempotency::IdempotencyCache;
use kagan_runtime::instrumentation::Instrumentation;
use kagan_runtime::jobs::JobService;
use kagan_runtime::lease::{InstanceLease, LeaseError};
use kagan_runtime::orchestrator::scheduler;
use kagan_runtime::plugins::{self, PluginRegistry};
use kagan_runtime::queued_messages::QueuedMessageService;
use kagan_runtime::registry::RuntimeRegistry;
use kagan_runtime::server::{self, ConnectionTracker};
use kagan_runtime::storage::Storage;
use kagan_runtime::transport::{self, TransportHandle, TransportType};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};

const EXIT_OK: i32 = 0;
const EXIT_LEASE_HELD: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_INTERNAL_ERROR: i32 = 3;

fn server_token() -> Arc<str> {
    std::env::var("KAGAN_CORE_TOKEN")
        .unwrap_or_else(|_| transport::generate_handshake_token())
        .into()
}

#[derive(Serialize)]
struct EndpointInfo<'a> {
    transport: &'a str,
    address: &'a str,
    port: Option<u16>,
    pid: u32,
}

/// Writes `endpoint.json` and `token` into the runtime directory so the
/// `kagan` CLI launcher can find this process without guessing the
/// transport choice or handshake token (spec §6 discovery files).
fn write_endpoint_info(runtime_dir: &std::path::Path, handle: &TransportHandle, token: &str) {
    let transport = match handle.transport_type {
        TransportType::Unix => "unix",
        TransportType::Tcp => "tcp",
    };
    let info = EndpointInfo { transport, address: &handle.address, port: handle.port, pid: std::process::id() };
    if let Ok(json) = serde_json::to_string_pretty(&info) {
        let _ = std::fs::write(runtime_dir.join("endpoint.json"), json);
    }
    let _ = std::fs::write(runtime_dir.join("token"), token);
}

fn remove_endpoint_info(runtime_dir: &std::path::Path) {
    let _ = std::fs::remove_file(runtime_dir.join("endpoint.json"));
    let _ = std::fs::remove_file(runtime_dir.join("token"));
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();

    let exit_code = run().await;
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let project_dir = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let runtime_dir = kagan_common::runtime_dir(&project_dir);
    let lease = match InstanceLease::acquire(&runtime_dir) {
        Ok(lease) => lease,
        Err(LeaseError::HeldByOther { owner_pid, owner_hostname }) => {
            tracing::error!(owner_pid, owner_hostname, "instance lease already held");
            return EXIT_LEASE_HELD;
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to acquire instance lease");
            return EXIT_CONFIG_ERROR;
        }
    };

    let storage = match Storage::open(&runtime_dir.join("core.db")) {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            tracing::error!(error = %err, "failed to open storage");
            lease.release();
            return EXIT_CONFIG_ERROR;
        }
    };

    let registry = Arc::new(RuntimeRegistry::new());
    let events = Arc::new(EventBus::new());
    let idempotency = Arc::new(IdempotencyCache::default());
    let jobs = Arc::new(JobService::new());
    let queued_messages = Arc::new(QueuedMessageService::new());
    let instrumentation = Arc::new(Instrumentation::from_env());

    let mut plugin_registry = PluginRegistry::new();
    if let Err(err) = plugins::github::register(&mut plugin_registry, storage.clone()) {
        tracing::error!(error = %err, "failed to register github plugin");
        lease.release();
        return EXIT_CONFIG_ERROR;
    }
    let plugins = Arc::new(plugin_registry);

    if let Err(err) = registry::reconcile_startup(&registry, &storage) {
        tracing::error!(error = %err, "startup reconciliation failed");
        lease.release();
        return EXIT_INTERNAL_ERROR;
    }

    let ctx = Arc::new(DispatchContext {
        storage: storage.clone(),
        registry: registry.clone(),
        events: events.clone(),
        idempotency,
        jobs,
        queued_messages,
        plugins,
        instrumentation,
    });

    let token = server_token();
    let transport_type = match std::env::var("KAGAN_CORE_TRANSPORT").as_deref() {
        Ok("tcp") => TransportType::Tcp,
        _ => TransportType::Unix,
    };

    let tracker = Arc::new(ConnectionTracker::new());
    let shutdown = Arc::new(tokio::sync::Notify::new());

    events.publish(DomainEvent::CoreHostRunning {
        event_id: kagan_common::new_id(),
        occurred_at: chrono::Utc::now(),
    });

    let scheduler_handle = spawn_scheduler(storage.clone(), registry.clone(), events.clone(), shutdown.clone());

    let accept_result = match transport_type {
        TransportType::Unix => {
            run_unix(&runtime_dir, ctx.clone(), token, tracker.clone(), shutdown.clone()).await
        }
        TransportType::Tcp => run_tcp(&runtime_dir, ctx.clone(), token, tracker.clone(), shutdown.clone()).await,
    };

    if let Err(ref err) = accept_result {
        tracing::error!(error = %err, "accept loop failed");
    }

    events.publish(DomainEvent::CoreHostDraining {
        event_id: kagan_common::new_id(),
        occurred_at: chrono::Utc::now(),
        reason: "shutdown signal received".to_string(),
    });

    scheduler_handle.abort();
    drain_connections(&tracker).await;

    remove_endpoint_info(&runtime_dir);
    lease.release();
    events.publish(DomainEvent::CoreHostStopped {
        event_id: kagan_common::new_id(),
        occurred_at: chrono::Utc::now(),
    });

    if accept_result.is_err() { EXIT_INTERNAL_ERROR } else { EXIT_OK }
}

fn spawn_scheduler(
    storage: Arc<Storage>,
    registry: Arc<RuntimeRegistry>,
    events: Arc<EventBus>,
    shutdown: Arc<tokio::sync::Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(scheduler::DEFAULT_TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = scheduler::tick(storage.clone(), registry.clone(), events.clone()).await {
                        tracing::warn!(error = %err, "scheduler tick failed");
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    })
}

async fn wait_for_shutdown_signal() {
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

async fn run_unix(
    runtime_dir: &std::path::Path,
    ctx: Arc<DispatchContext>,
    token: Arc<str>,
    tracker: Arc<ConnectionTracker>,
    shutdown: Arc<tokio::sync::Notify>,
) -> Result<(), std::io::Error> {
    let socket_path = runtime_dir.join("core.sock");
    let (listener, handle) = transport::bind_unix(&socket_path).map_err(std::io::Error::other)?;
    tracing::info!(address = %handle.address, "core host listening on unix socket");
    write_endpoint_info(runtime_dir, &handle, &token);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let ctx = ctx.clone();
                let token = token.clone();
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    server::handle_connection(stream, ctx, token, tracker).await;
                });
            }
            _ = wait_for_shutdown_signal() => {
                shutdown.notify_waiters();
                return Ok(());
            }
        }
    }
}

async fn run_tcp(
    runtime_dir: &std::path::Path,
    ctx: Arc<DispatchContext>,
    token: Arc<str>,
    tracker: Arc<ConnectionTracker>,
    shutdown: Arc<tokio::sync::Notify>,
) -> Result<(), std::io::Error> {
    let port: u16 = std::env::var("KAGAN_CORE_TCP_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(0);
    let (listener, handle) = transport::bind_tcp(port).await.map_err(std::io::Error::other)?;
    tracing::info!(address = %handle.address, "core host listening on tcp");
    write_endpoint_info(runtime_dir, &handle, &token);

    loop {
        tokio::select! {
            accepted = transport::accept_tcp(&listener, &token) => {
                match accepted {
                    Ok(stream) => {
                        let ctx = ctx.clone();
                        let token = token.clone();
                        let tracker = tracker.clone();
                        tokio::spawn(async move {
                            server::handle_connection(stream, ctx, token, tracker).await;
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "tcp handshake failed"),
                }
            }
            _ = wait_for_shutdown_signal() => {
                shutdown.notify_waiters();
                return Ok(());
            }
        }
    }
}

/// Waits for in-flight connections to finish, up to a fixed grace period,
/// rather than severing them mid-request.
async fn drain_connections(tracker: &ConnectionTracker) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tracker.active_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

mod registry {
    use kagan_runtime::registry::RuntimeRegistry;
    use kagan_runtime::storage::{Storage, StorageError};

    /// Marks orphaned executions dropped and lets the scheduler's next tick
    /// naturally resume resumable AUTO tasks (spec §4.9 "reconcile on
    /// startup") rather than racing a spawn in from here.
    pub fn reconcile_startup(_registry: &RuntimeRegistry, storage: &Storage) -> Result<Vec<String>, StorageError> {
        RuntimeRegistry::reconcile_on_startup(storage)
    }
}
