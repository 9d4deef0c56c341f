//! IPC Server module for remote control of the demo loop.
//!
//! This module provides a Unix Domain Socket server speaking
//! newline-delimited JSON. Commands that affect the loop are forwarded as
//! `UiEvent`s over a channel the loop drains once per cycle; status is read
//! from the last value the loop published.

use crate::effects::EffectKind;
use crate::error::IpcError;
use crate::metrics::ControlMetrics;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Default socket path for IPC communication.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/vidpace.sock";

/// Commands that can be received via IPC.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "command")]
pub enum IpcCommand {
    Stop,
    SetEffect { effect: String },
    Snapshot,
    RaiseConstraint,
    LowerConstraint,
    GetStatus,
    GetMetrics,
}

/// Events delivered to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    Exit,
    SetEffect(EffectKind),
    Snapshot,
    RaiseConstraint,
    LowerConstraint,
}

/// Status response sent to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusResponse {
    pub running: bool,
    /// Last published rate, null until the first window closes.
    pub current_fps: Option<f64>,
    pub target_fps: u16,
    pub resolution: String,
    pub resolution_index: usize,
    pub granted_level: u8,
    pub max_level: u8,
    pub controller_state: String,
    pub effect: EffectKind,
    pub frames_total: u64,
    pub avg_cycle_ms: f64,
    pub p99_cycle_ms: f64,
}

impl Default for StatusResponse {
    fn default() -> Self {
        Self {
            running: false,
            current_fps: None,
            target_fps: 0,
            resolution: "0x0".to_string(),
            resolution_index: 0,
            granted_level: 0,
            max_level: 0,
            controller_state: "STABLE".to_string(),
            effect: EffectKind::None,
            frames_total: 0,
            avg_cycle_ms: 0.0,
            p99_cycle_ms: 0.0,
        }
    }
}

/// Handles shared between the IPC server and the control loop.
pub struct IpcContext {
    pub events: mpsc::UnboundedSender<UiEvent>,
    pub status: watch::Receiver<StatusResponse>,
    pub metrics: Arc<ControlMetrics>,
}

impl IpcContext {
    fn send(&self, event: UiEvent) -> serde_json::Value {
        match self.events.send(event) {
            Ok(()) => serde_json::json!({
                "success": true,
                "message": format!("{:?} queued", event)
            }),
            Err(_) => serde_json::json!({
                "success": false,
                "error": "Control loop is not running"
            }),
        }
    }
}

/// Unix Domain Socket server for IPC.
#[cfg(unix)]
pub struct IpcServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Unix listener for incoming connections
    listener: UnixListener,
}

#[cfg(unix)]
impl IpcServer {
    /// Create a new IPC server at the specified path.
    ///
    /// Any existing file at the path is removed first.
    pub async fn new(path: &Path) -> Result<Self, IpcError> {
        let socket_path = path.to_path_buf();

        Self::cleanup_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|e| IpcError::SocketBindFailed {
            path: socket_path.display().to_string(),
            source: e,
        })?;
        tracing::info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            socket_path,
            listener,
        })
    }

    /// Clean up an existing socket file.
    fn cleanup_socket(path: &Path) -> Result<(), IpcError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| IpcError::SocketBindFailed {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections forever, one task per client.
    pub async fn run(&self, ctx: Arc<IpcContext>) -> Result<(), IpcError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, ctx).await {
                            tracing::warn!("Error handling IPC connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting IPC connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(stream: UnixStream, ctx: Arc<IpcContext>) -> Result<(), IpcError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        while reader.read_line(&mut line).await? > 0 {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                line.clear();
                continue;
            }

            let response = match serde_json::from_str::<IpcCommand>(trimmed) {
                Ok(command) => Self::handle_command(command, &ctx),
                Err(e) => serde_json::json!({
                    "error": IpcError::InvalidCommand(e.to_string()).to_string()
                }),
            };

            let response_str = serde_json::to_string(&response)?;
            writer.write_all(response_str.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;

            line.clear();
        }

        Ok(())
    }

    /// Handle a single IPC command and return the response.
    pub fn handle_command(command: IpcCommand, ctx: &IpcContext) -> serde_json::Value {
        match command {
            IpcCommand::Stop => {
                tracing::info!("Stop requested via IPC");
                ctx.send(UiEvent::Exit)
            }

            IpcCommand::SetEffect { effect } => match effect.parse::<EffectKind>() {
                Ok(kind) => {
                    tracing::info!("Effect set via IPC: {}", kind);
                    ctx.send(UiEvent::SetEffect(kind))
                }
                Err(e) => {
                    // Unknown selectors degrade to no effect.
                    tracing::warn!("{}, falling back to none", e);
                    let _ = ctx.events.send(UiEvent::SetEffect(EffectKind::None));
                    serde_json::json!({
                        "success": false,
                        "error": e.to_string(),
                        "effect": EffectKind::None.name()
                    })
                }
            },

            IpcCommand::Snapshot => ctx.send(UiEvent::Snapshot),

            IpcCommand::RaiseConstraint => ctx.send(UiEvent::RaiseConstraint),

            IpcCommand::LowerConstraint => ctx.send(UiEvent::LowerConstraint),

            IpcCommand::GetStatus => {
                let status = ctx.status.borrow().clone();
                serde_json::to_value(status).unwrap_or_else(|e| {
                    serde_json::json!({
                        "error": format!("Failed to serialize status: {}", e)
                    })
                })
            }

            IpcCommand::GetMetrics => serde_json::to_value(ctx.metrics.snapshot())
                .unwrap_or_else(|e| {
                    serde_json::json!({
                        "error": format!("Failed to serialize metrics: {}", e)
                    })
                }),
        }
    }
}

#[cfg(unix)]
impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn context() -> (
        IpcContext,
        mpsc::UnboundedReceiver<UiEvent>,
        watch::Sender<StatusResponse>,
    ) {
        let (events, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(StatusResponse::default());
        let ctx = IpcContext {
            events,
            status,
            metrics: Arc::new(ControlMetrics::new()),
        };
        (ctx, rx, status_tx)
    }

    impl StatusResponse {
        /// Check if the response carries a known controller state and resolution.
        fn is_complete(&self) -> bool {
            let valid_states = ["STABLE", "REQUEST_PENDING"];
            let state_valid = valid_states.contains(&self.controller_state.as_str());
            let resolution_valid = self
                .resolution
                .split_once('x')
                .map(|(w, h)| w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok())
                .unwrap_or(false);
            state_valid && resolution_valid
        }
    }

    #[test]
    fn test_ipc_command_serialization() {
        let json = serde_json::to_string(&IpcCommand::Stop).unwrap();
        assert_eq!(json, "{\"command\":\"Stop\"}");

        let cmd = IpcCommand::SetEffect {
            effect: "edges".to_string(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\":\"SetEffect\""));
        assert!(json.contains("\"effect\":\"edges\""));

        let parsed: IpcCommand = serde_json::from_str("{\"command\":\"RaiseConstraint\"}").unwrap();
        assert_eq!(parsed, IpcCommand::RaiseConstraint);
        assert!(serde_json::from_str::<IpcCommand>("{\"command\":\"Start\"}").is_err());
    }

    #[test]
    fn test_status_response_is_complete() {
        let status = StatusResponse {
            resolution: "640x480".to_string(),
            ..Default::default()
        };
        assert!(status.is_complete());

        let bad_state = StatusResponse {
            controller_state: "Dropping".to_string(),
            ..status.clone()
        };
        assert!(!bad_state.is_complete());

        let bad_resolution = StatusResponse {
            resolution: "wide".to_string(),
            ..status
        };
        assert!(!bad_resolution.is_complete());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ipc_server_creation_and_cleanup() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        std::fs::write(&socket_path, "stale").unwrap();

        let server = IpcServer::new(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        assert_eq!(server.socket_path(), socket_path.as_path());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commands_become_events() {
        let (ctx, mut rx, _status_tx) = context();

        let response = IpcServer::handle_command(IpcCommand::Stop, &ctx);
        assert!(response["success"].as_bool().unwrap());
        assert_eq!(rx.try_recv().unwrap(), UiEvent::Exit);

        IpcServer::handle_command(
            IpcCommand::SetEffect {
                effect: "corners".to_string(),
            },
            &ctx,
        );
        assert_eq!(rx.try_recv().unwrap(), UiEvent::SetEffect(EffectKind::Corners));

        IpcServer::handle_command(IpcCommand::Snapshot, &ctx);
        IpcServer::handle_command(IpcCommand::LowerConstraint, &ctx);
        IpcServer::handle_command(IpcCommand::RaiseConstraint, &ctx);
        assert_eq!(rx.try_recv().unwrap(), UiEvent::Snapshot);
        assert_eq!(rx.try_recv().unwrap(), UiEvent::LowerConstraint);
        assert_eq!(rx.try_recv().unwrap(), UiEvent::RaiseConstraint);
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unknown_effect_degrades_to_none() {
        let (ctx, mut rx, _status_tx) = context();
        let response = IpcServer::handle_command(
            IpcCommand::SetEffect {
                effect: "surf".to_string(),
            },
            &ctx,
        );
        assert!(!response["success"].as_bool().unwrap());
        assert!(response["error"].as_str().unwrap().contains("surf"));
        assert_eq!(rx.try_recv().unwrap(), UiEvent::SetEffect(EffectKind::None));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_closed_loop_reports_failure() {
        let (ctx, rx, _status_tx) = context();
        drop(rx);
        let response = IpcServer::handle_command(IpcCommand::Stop, &ctx);
        assert!(!response["success"].as_bool().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_get_status_reads_published_value() {
        let (ctx, _rx, status_tx) = context();
        status_tx
            .send(StatusResponse {
                running: true,
                current_fps: Some(24.5),
                target_fps: 25,
                resolution: "320x240".to_string(),
                ..Default::default()
            })
            .unwrap();

        let response = IpcServer::handle_command(IpcCommand::GetStatus, &ctx);
        assert!(response["running"].as_bool().unwrap());
        assert_eq!(response["current_fps"].as_f64().unwrap(), 24.5);
        assert_eq!(response["resolution"], "320x240");
        assert_eq!(response["controller_state"], "STABLE");
        assert_eq!(response["effect"], "none");

        let metrics = IpcServer::handle_command(IpcCommand::GetMetrics, &ctx);
        assert!(metrics["requests"].is_number());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("rt.sock");
        let server = IpcServer::new(&socket_path).await.unwrap();
        let (ctx, mut rx, _status_tx) = context();
        let ctx = Arc::new(ctx);

        let accept = tokio::spawn(async move {
            let _ = server.run(ctx).await;
        });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{\"command\":\"Snapshot\"}\n\nnot json\n").await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let ok: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(ok["success"].as_bool().unwrap());
        let err: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(err["error"].as_str().unwrap().starts_with("Invalid command"));
        assert_eq!(rx.recv().await, Some(UiEvent::Snapshot));

        accept.abort();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_status_response_contains_all_required_fields(
            running in any::<bool>(),
            current_fps in prop::option::of(0.0f64..=200.0f64),
            width in 1u32..4096u32,
            height in 1u32..4096u32,
            pending in any::<bool>(),
            frames_total in any::<u64>(),
        ) {
            let response = StatusResponse {
                running,
                current_fps,
                target_fps: 25,
                resolution: format!("{}x{}", width, height),
                resolution_index: 1,
                granted_level: 1,
                max_level: 2,
                controller_state: if pending { "REQUEST_PENDING" } else { "STABLE" }.to_string(),
                effect: EffectKind::Blur,
                frames_total,
                avg_cycle_ms: 12.5,
                p99_cycle_ms: 30.0,
            };

            let parsed: serde_json::Value =
                serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();
            for field in [
                "running", "current_fps", "target_fps", "resolution", "resolution_index",
                "granted_level", "max_level", "controller_state", "effect", "frames_total",
                "avg_cycle_ms", "p99_cycle_ms",
            ] {
                prop_assert!(parsed.get(field).is_some(), "Missing '{}' field", field);
            }
            prop_assert_eq!(parsed["current_fps"].is_null(), current_fps.is_none());
            prop_assert_eq!(parsed["frames_total"].as_u64().unwrap(), frames_total);
            prop_assert!(response.is_complete());
        }
    }
}
