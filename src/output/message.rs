// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! WebSocket 消息输出
//! 每轮一条文本消息: `{"image": <base64 JPEG>, "metrics": {...}}`

use std::io::{ErrorKind, Read, Write};

use base64::Engine;
use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::{Message, WebSocket};

use super::{encode_jpeg, FrameSink};
use crate::detection::FrameMetrics;
use crate::error::SinkError;

#[derive(Serialize)]
struct Payload<'a> {
    image: String,
    metrics: &'a FrameMetrics,
}

/// 构造一条消息
pub fn build_message(
    frame: &RgbImage,
    metrics: &FrameMetrics,
    quality: u8,
) -> Result<String, SinkError> {
    let jpeg = encode_jpeg(frame, quality)?;
    let payload = Payload {
        image: base64::engine::general_purpose::STANDARD.encode(jpeg),
        metrics,
    };
    serde_json::to_string(&payload).map_err(|e| SinkError::Encode(e.to_string()))
}

/// WebSocket 输出
pub struct WebSocketSink<S: Read + Write> {
    socket: WebSocket<S>,
    quality: u8,
    closed: bool,
    sent: u64,
}

impl<S: Read + Write> WebSocketSink<S> {
    pub fn new(socket: WebSocket<S>, quality: u8) -> Self {
        Self {
            socket,
            quality,
            closed: false,
            sent: 0,
        }
    }

    /// 以 1011 关闭 (服务端无法继续, 例如视频源打不开)
    pub fn close_with_error(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        let frame = CloseFrame {
            code: CloseCode::Error,
            reason: reason.to_string().into(),
        };
        let _ = self.socket.close(Some(frame));
        let _ = self.socket.flush();
        self.closed = true;
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

fn map_ws_error(e: tungstenite::Error) -> SinkError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            SinkError::Disconnected
        }
        tungstenite::Error::Io(io) => match io.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                SinkError::Disconnected
            }
            _ => SinkError::Io(io),
        },
        other => SinkError::Protocol(other.to_string()),
    }
}

impl<S: Read + Write + Send> FrameSink for WebSocketSink<S> {
    fn send(&mut self, frame: &RgbImage, metrics: &FrameMetrics) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Disconnected);
        }
        let text = build_message(frame, metrics, self.quality)?;
        self.socket.send(Message::text(text)).map_err(map_ws_error)?;
        self.sent += 1;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
        self.closed = true;
        info!("🔌 WebSocket 已关闭 (发送 {} 条)", self.sent);
    }
}

impl<S: Read + Write> Drop for WebSocketSink<S> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.socket.close(None);
            let _ = self.socket.flush();
            debug!("🧹 WebSocket 句柄已释放");
        }
    }
}
