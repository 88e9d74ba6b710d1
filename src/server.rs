// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! WebSocket 服务: `/ws/{stream_key}` 每个连接一个线程、一个会话

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;

use crate::config::Settings;
use crate::detection::SharedDetector;
use crate::error::SessionError;
use crate::input::{FfmpegCapture, SourceSpec};
use crate::output::WebSocketSink;
use crate::pipeline::{Annotator, PipelineSession};
use crate::registry::CameraRegistry;
use crate::stop::StopSignal;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// 所有连接共享的只读上下文
pub struct ServerContext {
    pub settings: Settings,
    pub registry: CameraRegistry,
    pub detector: SharedDetector,
    pub annotator: Arc<Annotator>,
    pub stop: StopSignal,
}

/// 从请求路径中取出流名
pub fn parse_stream_key(path: &str) -> Option<&str> {
    let key = path.strip_prefix("/ws/")?;
    if key.is_empty() || key.contains('/') {
        return None;
    }
    Some(key)
}

/// 监听并为每个连接启动会话线程, 直到收到停止信号
pub fn serve(ctx: Arc<ServerContext>) -> Result<()> {
    let bind = ctx.settings.server.bind.clone();
    let listener = TcpListener::bind(&bind).with_context(|| format!("bind {}", bind))?;
    listener.set_nonblocking(true)?;
    info!("🌐 WebSocket 服务已启动: ws://{}/ws/{{stream_key}}", bind);

    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    while !ctx.stop.is_stopped() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = Arc::clone(&ctx);
                let spawned = thread::Builder::new()
                    .name(format!("ws-{}", peer))
                    .spawn(move || {
                        if let Err(e) = handle_connection(stream, peer, &ctx) {
                            warn!("⚠️ 连接 {} 结束: {:#}", peer, e);
                        }
                    });
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => error!("❌ 无法创建会话线程: {}", e),
                }
                workers.retain(|w| !w.is_finished());
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => warn!("⚠️ accept 失败: {}", e),
        }
    }

    info!("🛑 服务停止, 等待 {} 个会话退出", workers.len());
    for worker in workers {
        if worker.join().is_err() {
            error!("❌ 会话线程异常退出");
        }
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: &ServerContext) -> Result<()> {
    let server = &ctx.settings.server;
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    // 消费端卡住时写超时, 让会话以传输失败结束
    stream.set_write_timeout(Some(Duration::from_millis(server.write_timeout_ms)))?;

    let mut key = String::new();
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match parse_stream_key(req.uri().path()) {
            Some(k) => {
                key = k.to_string();
                Ok(resp)
            }
            None => {
                let mut reject = ErrorResponse::new(Some("expected /ws/{stream_key}".to_string()));
                *reject.status_mut() = StatusCode::NOT_FOUND;
                Err(reject)
            }
        }
    };
    let socket = tungstenite::accept_hdr(stream, callback)
        .map_err(|e| anyhow!("handshake with {} failed: {}", peer, e))?;
    info!("🔗 新连接 {} → {}", peer, key);

    let mut sink = WebSocketSink::new(socket, server.jpeg_quality);
    let entry = ctx
        .registry
        .resolve(&key, &server.source_template, &ctx.settings.counting);
    let spec = SourceSpec::parse(&entry.source);
    let fps = spec.resolve_fps(ctx.settings.pacing.live_fps, ctx.settings.pacing.fallback_fps);

    let mut capture = match FfmpegCapture::open(spec, &ctx.settings.capture, fps) {
        Ok(capture) => capture,
        Err(e) => {
            sink.close_with_error(&format!("Cannot connect to stream: {}", key));
            return Err(SessionError::SourceUnavailable(e).into());
        }
    };

    let mut session = PipelineSession::from_settings(
        key.clone(),
        &ctx.settings,
        &entry.counting(),
        Box::new(ctx.detector.clone()),
        Arc::clone(&ctx.annotator),
    );
    let summary = session.run(&mut capture, &mut sink, &ctx.stop)?;
    info!(
        "✅ 会话 {} 完成: {} 帧, 累计 {} 人 ({:?})",
        key, summary.frames, summary.occupancy, summary.end
    );
    Ok(())
}
