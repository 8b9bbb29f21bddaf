//! Server Lifecycle Manager (spec §4.2).
//!
//! Subprocess spawn/stream/wait shape follows the teacher's
//! `ProcessRuntime::execute`; readiness-keyword detection is pinned against
//! the original `llama_server_manager.py::_wait_for_readiness`.

use crate::config::ServerConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use orchestrator_types::{DiscoveredModel, ServerKey, ServerProcess};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::{info, warn};

const READINESS_KEYWORDS: [&str; 5] = [
    "http server listening",
    "server is listening",
    "listening on",
    "server started",
    "ready to receive requests",
];

const CRITICAL_ERROR_KEYWORDS: [&str; 4] = [
    "error loading model",
    "failed to load",
    "cannot open model file",
    "ggml_init_cublas: failed",
];

fn classify_log_line(line: &str) -> LogLevel {
    let lowered = line.to_lowercase();
    if ["error", "failed", "exception"].iter().any(|kw| lowered.contains(kw)) {
        LogLevel::Error
    } else if ["warn", "warning"].iter().any(|kw| lowered.contains(kw)) {
        LogLevel::Warn
    } else {
        LogLevel::Info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A tagged stderr/stdout line forwarded to the Event Bus.
#[derive(Debug, Clone)]
pub struct ServerLogLine {
    pub model_id: String,
    pub port: u16,
    pub level: LogLevel,
    pub line: String,
}

struct TrackedServer {
    process: ServerProcess,
    child: Option<Child>,
}

/// Supervises inference-server subprocesses for a set of enabled models.
pub struct ServerManager {
    config: ServerConfig,
    servers: Arc<RwLock<HashMap<ServerKey, TrackedServer>>>,
    log_tx: tokio::sync::broadcast::Sender<ServerLogLine>,
    http: reqwest::Client,
}

impl ServerManager {
    pub fn new(config: ServerConfig) -> Self {
        let (log_tx, _) = tokio::sync::broadcast::channel(1024);
        Self {
            config,
            servers: Arc::new(RwLock::new(HashMap::new())),
            log_tx,
            http: reqwest::Client::new(),
        }
    }

    pub fn subscribe_logs(&self) -> tokio::sync::broadcast::Receiver<ServerLogLine> {
        self.log_tx.subscribe()
    }

    /// Starts (or returns the already-tracked) server for `model` under `key`.
    pub async fn start(&self, key: ServerKey, model: DiscoveredModel) -> OrchestratorResult<ServerProcess> {
        {
            let servers = self.servers.read().await;
            if let Some(existing) = servers.get(&key) {
                return Ok(existing.process.clone());
            }
        }

        let port = model.port.ok_or_else(|| {
            OrchestratorError::ServerLifecycle {
                model_id: model.model_id.clone(),
                message: "model has no assigned port".to_string(),
            }
        })?;

        let (process, child) = if self.config.use_external_servers {
            (self.probe_external(&model, port).await?, None)
        } else {
            let (process, child) = self.spawn_and_wait(&model, port).await?;
            (process, Some(child))
        };

        let mut servers = self.servers.write().await;
        servers.insert(
            key,
            TrackedServer {
                process: process.clone(),
                child,
            },
        );
        Ok(process)
    }

    async fn probe_external(&self, model: &DiscoveredModel, port: u16) -> OrchestratorResult<ServerProcess> {
        let url = format!("http://{}:{}/health", self.config.host, port);
        self.http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| OrchestratorError::ServerLifecycle {
                model_id: model.model_id.clone(),
                message: format!("external server health probe failed: {e}"),
            })?;
        Ok(ServerProcess {
            model: model.clone(),
            port,
            pid: None,
            start_time: chrono::Utc::now(),
            is_ready: true,
            is_external: true,
        })
    }

    async fn spawn_and_wait(&self, model: &DiscoveredModel, port: u16) -> OrchestratorResult<(ServerProcess, Child)> {
        if !path_exists(&self.config.binary_path) {
            return Err(OrchestratorError::ServerLifecycle {
                model_id: model.model_id.clone(),
                message: format!("inference binary not found: {}", self.config.binary_path),
            });
        }

        let args = self.build_args(model, port);
        let mut child = Command::new(&self.config.binary_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OrchestratorError::ServerLifecycle {
                model_id: model.model_id.clone(),
                message: format!("failed to spawn inference process: {e}"),
            })?;

        let pid = child.id();
        let stderr = child.stderr.take().expect("stderr was piped");
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let log_tx = self.log_tx.clone();
        let model_id = model.model_id.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut ready_tx = Some(ready_tx);
            while let Ok(Some(line)) = lines.next_line().await {
                let lowered = line.to_lowercase();
                if let Some(tx) = ready_tx.take() {
                    if READINESS_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
                        let _ = tx.send(Ok(()));
                    } else if CRITICAL_ERROR_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
                        let _ = tx.send(Err(line.clone()));
                    } else {
                        ready_tx = Some(tx);
                    }
                }
                let _ = log_tx.send(ServerLogLine {
                    model_id: model_id.clone(),
                    port,
                    level: classify_log_line(&line),
                    line,
                });
            }
        });

        let startup_timeout = Duration::from_secs(self.config.max_startup_time_secs);
        let is_ready = match tokio::time::timeout(startup_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(stderr_tail))) => {
                let _ = child.kill().await;
                return Err(OrchestratorError::ServerStartupFailed(stderr_tail));
            }
            Ok(Err(_recv_dropped)) => {
                let _ = child.kill().await;
                return Err(OrchestratorError::ServerStartupFailed(
                    "server process died during startup".to_string(),
                ));
            }
            Err(_elapsed) => {
                match child.try_wait() {
                    Ok(Some(_status)) => {
                        return Err(OrchestratorError::ServerStartupFailed(
                            "server process died during startup".to_string(),
                        ));
                    }
                    _ => {
                        warn!(model_id = %model.model_id, "readiness timeout expired without a clear signal; marking ready optimistically");
                        true
                    }
                }
            }
        };

        info!(model_id = %model.model_id, port, "inference server ready");

        Ok((
            ServerProcess {
                model: model.clone(),
                port,
                pid,
                start_time: chrono::Utc::now(),
                is_ready,
                is_external: false,
            },
            child,
        ))
    }

    fn build_args(&self, model: &DiscoveredModel, port: u16) -> Vec<String> {
        let runtime = &self.config.runtime;
        let n_gpu_layers = model.runtime.n_gpu_layers.unwrap_or(runtime.n_gpu_layers);
        let ctx_size = model.runtime.ctx_size.unwrap_or(runtime.ctx_size);
        let n_threads = model.runtime.n_threads.unwrap_or(runtime.n_threads);
        let batch_size = model.runtime.batch_size.unwrap_or(runtime.batch_size);

        let mut args = vec![
            "--model".to_string(),
            model.file_path.to_string_lossy().to_string(),
            "--host".to_string(),
            self.config.host.clone(),
            "--port".to_string(),
            port.to_string(),
            "--ctx-size".to_string(),
            ctx_size.to_string(),
            "--n-gpu-layers".to_string(),
            n_gpu_layers.to_string(),
            "--threads".to_string(),
            n_threads.to_string(),
            "--batch-size".to_string(),
            batch_size.to_string(),
            "--ubatch-size".to_string(),
            batch_size.to_string(),
        ];
        if runtime.flash_attn {
            args.push("--flash-attn".to_string());
        }
        if runtime.no_mmap {
            args.push("--no-mmap".to_string());
        }
        args
    }

    /// Concurrent fan-out over `models`; tolerant of individual failures.
    pub async fn start_all(&self, models: Vec<DiscoveredModel>) -> Vec<(String, OrchestratorResult<ServerProcess>)> {
        let futures = models.into_iter().map(|model| {
            let model_id = model.model_id.clone();
            let key = ServerKey::Base(model_id.clone());
            async move { (model_id, self.start(key, model).await) }
        });
        futures::future::join_all(futures).await
    }

    /// Sends SIGTERM, waits up to `graceful_timeout` for exit, then SIGKILLs.
    pub async fn stop(&self, key: ServerKey, graceful_timeout: Duration) -> OrchestratorResult<()> {
        let mut servers = self.servers.write().await;
        let Some(mut tracked) = servers.remove(&key) else {
            return Ok(());
        };
        if tracked.process.is_external {
            warn!(key = %key, "removing tracking for external server, process left running");
            return Ok(());
        }
        if let Some(mut child) = tracked.child.take() {
            if let Some(pid) = child.id() {
                let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGTERM);
            }
            if tokio::time::timeout(graceful_timeout, child.wait()).await.is_err() {
                let _ = child.kill().await;
            }
        }
        Ok(())
    }

    pub async fn stop_all(&self, graceful_timeout: Duration) {
        let keys: Vec<ServerKey> = {
            let servers = self.servers.read().await;
            servers.keys().cloned().collect()
        };
        let futures = keys.into_iter().map(|key| self.stop(key, graceful_timeout));
        futures::future::join_all(futures).await;
    }

    pub async fn status_summary(&self) -> Vec<orchestrator_types::ServerStatusSnapshot> {
        let servers = self.servers.read().await;
        servers.values().map(|t| t.process.status()).collect()
    }

    pub async fn get(&self, key: &ServerKey) -> Option<ServerProcess> {
        self.servers.read().await.get(key).map(|t| t.process.clone())
    }
}

fn path_exists(path: &str) -> bool {
    std::path::Path::new(path).exists()
}
