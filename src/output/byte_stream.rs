// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ffmpeg 子进程输出 (rawvideo stdin → libx264 → flv/RTMP)
//!
//! 生命周期: 启动 (spawn) → 喂帧 (write + flush) → 管道断开即报错 → 终止 (关闭 stdin,
//! 限时等待, 超时 kill) → 回收. Drop 时执行终止.

use std::ffi::OsStr;
use std::io::{ErrorKind, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info, warn};

use super::FrameSink;
use crate::detection::FrameMetrics;
use crate::error::SinkError;

/// ffmpeg 参数: 固定分辨率 RGB24 输入, H.264 FLV 输出
pub fn ffmpeg_args(width: u32, height: u32, fps: f64, preset: &str, output_url: &str) -> Vec<String> {
    [
        "-y",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-vcodec",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "-s",
        &format!("{}x{}", width, height),
        "-r",
        &format!("{}", fps),
        "-i",
        "-",
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
        "-preset",
        preset,
        "-f",
        "flv",
        output_url,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// ffmpeg stdin 管道输出
pub struct FfmpegPipeSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
    terminate_timeout: Duration,
    frames_written: u64,
}

impl FfmpegPipeSink {
    /// 启动子进程
    pub fn spawn<I, A>(
        program: impl AsRef<OsStr>,
        args: I,
        width: u32,
        height: u32,
        terminate_timeout: Duration,
    ) -> Result<Self, SinkError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdin = child.stdin.take();
        info!(
            "📤 推流进程已启动: {} (pid {}, {}x{})",
            program.to_string_lossy(),
            child.id(),
            width,
            height
        );
        Ok(Self {
            child: Some(child),
            stdin,
            width,
            height,
            terminate_timeout,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// 关闭 stdin, 限时等待退出, 超时强杀
    pub fn terminate(&mut self) {
        // 关闭 stdin 让 ffmpeg 收尾
        self.stdin.take();

        let Some(mut child) = self.child.take() else {
            return;
        };
        let deadline = Instant::now() + self.terminate_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("📤 推流进程已退出: {} (共 {} 帧)", status, self.frames_written);
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(None) => break,
                Err(e) => {
                    warn!("⚠️ 查询推流进程状态失败: {}", e);
                    break;
                }
            }
        }

        warn!("⚠️ 推流进程未在 {:?} 内退出, 强制结束", self.terminate_timeout);
        if let Err(e) = child.kill() {
            debug!("kill: {}", e);
        }
        let _ = child.wait();
    }
}

impl FrameSink for FfmpegPipeSink {
    fn send(&mut self, frame: &RgbImage, _metrics: &FrameMetrics) -> Result<(), SinkError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(SinkError::Encode(format!(
                "frame is {}x{}, stream expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let stdin = self.stdin.as_mut().ok_or(SinkError::BrokenPipe)?;
        let written = stdin.write_all(frame.as_raw()).and_then(|_| stdin.flush());
        match written {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                warn!("💔 推流管道已断开");
                self.stdin.take();
                Err(SinkError::BrokenPipe)
            }
            Err(e) => Err(SinkError::Io(e)),
        }
    }

    fn close(&mut self) {
        self.terminate();
    }
}

impl Drop for FfmpegPipeSink {
    fn drop(&mut self) {
        self.terminate();
    }
}
