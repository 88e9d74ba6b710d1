// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 人流哨兵 (Crowd Sentinel)
///
/// 实时人流分析:
/// 1. 采集线程: 视频解码与缩放 (独立工作线程)
/// 2. 会话循环: 检测 → 跟踪 → 过线计数 → 密度分级 → 标注 → 输出
/// 3. 输出:     WebSocket (serve) / ffmpeg RTMP 推流 (relay) / 只统计 (count)
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crowd_sentinel::config::Settings;
use crowd_sentinel::detection::{LineDirection, OnnxPersonDetector, SharedDetector};
use crowd_sentinel::input::{FfmpegCapture, SourceSpec};
use crowd_sentinel::output::{byte_stream, DiscardSink, FfmpegPipeSink};
use crowd_sentinel::pipeline::{Annotator, PipelineSession};
use crowd_sentinel::registry::{CameraEntry, CameraRegistry};
use crowd_sentinel::server::{self, ServerContext};
use crowd_sentinel::services::FaceRegistry;
use crowd_sentinel::stop::StopSignal;
use mimalloc::MiMalloc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "人流哨兵 - 实时人流计数与密度预警", long_about = None)]
struct Cli {
    /// 配置文件 (不存在时自动生成)
    #[arg(short, long, default_value = "sentinel.json", global = true)]
    config: PathBuf,

    /// 检测模型 (覆盖配置文件)
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// WebSocket 服务, 每个 /ws/{stream_key} 连接一个会话
    Serve {
        /// 监听地址
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// 处理一路视频并通过 ffmpeg 推送 RTMP
    Relay {
        #[command(flatten)]
        counting: CountingArgs,

        /// RTMP 输出地址
        #[arg(short, long)]
        output: Option<String>,
    },
    /// 离线统计过线人数
    Count {
        #[command(flatten)]
        counting: CountingArgs,

        /// 按视频帧率节拍运行
        #[arg(long, default_value_t = false)]
        paced: bool,
    },
    /// 管理参考人脸
    Faces {
        #[command(subcommand)]
        action: FacesAction,
    },
    /// 管理摄像头注册表 (serve 按流名查找)
    Cameras {
        #[command(subcommand)]
        action: CamerasAction,
    },
}

#[derive(Args, Debug)]
struct CountingArgs {
    /// 视频源: 文件路径 / 摄像头索引 / rtsp:// rtmp:// 地址
    #[arg(short, long)]
    source: String,

    /// 计数线 y 坐标
    #[arg(short, long)]
    line: Option<f32>,

    /// 计数方向: down 或 up
    #[arg(short, long)]
    direction: Option<LineDirection>,

    /// 容量上限
    #[arg(short, long)]
    threshold: Option<u64>,

    /// 会话名 (日志与通知中显示)
    #[arg(short, long, default_value = "local")]
    name: String,
}

#[derive(Subcommand, Debug)]
enum FacesAction {
    /// 列出参考人脸
    List,
    /// 添加参考人脸
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        image: PathBuf,
    },
    /// 删除参考人脸
    Remove {
        #[arg(short, long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum CamerasAction {
    /// 列出已注册的摄像头
    List,
    /// 注册或更新一个流名
    Add {
        /// 流名 (/ws/{key})
        #[arg(short, long)]
        key: String,

        /// 视频源: 文件路径 / 摄像头索引 / 网络地址
        #[arg(short, long)]
        source: String,

        #[arg(short, long)]
        line: Option<f32>,

        #[arg(short, long)]
        direction: Option<LineDirection>,

        #[arg(short, long)]
        threshold: Option<u64>,
    },
    /// 删除一个流名
    Remove {
        #[arg(short, long)]
        key: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crowd_sentinel=info,sentinel=info,ort=warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config);
    if let Some(model) = cli.model {
        settings.detector.model = model;
    }

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        info!("🛑 收到 Ctrl-C, 正在停止...");
        handler_stop.stop();
    })
    .context("install Ctrl-C handler")?;

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                settings.server.bind = bind;
            }
            run_serve(settings, stop)
        }
        Command::Relay { counting, output } => {
            if let Some(output) = output {
                settings.relay.output_url = output;
            }
            run_relay(settings, counting, stop)
        }
        Command::Count { counting, paced } => run_count(settings, counting, paced, stop),
        Command::Faces { action } => run_faces(&settings, action),
        Command::Cameras { action } => run_cameras(&settings, action),
    }
}

fn load_detector(settings: &Settings) -> Result<SharedDetector> {
    let detector = OnnxPersonDetector::new(&settings.detector.model, settings.detector.options())?;
    Ok(SharedDetector::new(Box::new(detector)))
}

fn apply_counting(settings: &mut Settings, args: &CountingArgs) {
    if let Some(line) = args.line {
        settings.counting.line_position = line;
    }
    if let Some(direction) = args.direction {
        settings.counting.direction = direction;
    }
    if let Some(threshold) = args.threshold {
        settings.counting.threshold = threshold;
    }
}

fn run_serve(settings: Settings, stop: StopSignal) -> Result<()> {
    info!("🚀 人流哨兵启动 (serve)");
    settings.log_summary();

    let registry = CameraRegistry::load(&settings.server.cameras)?;
    let ctx = ServerContext {
        detector: load_detector(&settings)?,
        annotator: Arc::new(Annotator::new(settings.annotate.font.as_deref())),
        registry,
        settings,
        stop,
    };
    server::serve(Arc::new(ctx))
}

fn run_relay(mut settings: Settings, args: CountingArgs, stop: StopSignal) -> Result<()> {
    info!("🚀 人流哨兵启动 (relay)");
    apply_counting(&mut settings, &args);
    settings.log_summary();

    let detector = load_detector(&settings)?;
    let spec = SourceSpec::parse(&args.source);
    let fps = spec.resolve_fps(settings.pacing.live_fps, settings.pacing.fallback_fps);
    let mut capture = FfmpegCapture::open(spec, &settings.capture, fps)?;

    let relay = &settings.relay;
    let ffmpeg_args = byte_stream::ffmpeg_args(
        settings.capture.width,
        settings.capture.height,
        fps,
        &relay.preset,
        &relay.output_url,
    );
    let mut sink = FfmpegPipeSink::spawn(
        &relay.ffmpeg,
        ffmpeg_args,
        settings.capture.width,
        settings.capture.height,
        Duration::from_millis(relay.terminate_timeout_ms),
    )
    .with_context(|| format!("spawn {}", relay.ffmpeg.display()))?;
    info!("📡 推流地址: {}", relay.output_url);

    let annotator = Arc::new(Annotator::new(settings.annotate.font.as_deref()));
    let mut session = PipelineSession::from_settings(
        args.name.clone(),
        &settings,
        &settings.counting,
        Box::new(detector),
        annotator,
    );
    let summary = session.run(&mut capture, &mut sink, &stop)?;
    info!("Final count: {}", summary.occupancy);
    Ok(())
}

fn run_count(mut settings: Settings, args: CountingArgs, paced: bool, stop: StopSignal) -> Result<()> {
    apply_counting(&mut settings, &args);
    // 离线统计不做人脸比对
    settings.faces.enabled = false;

    let detector = load_detector(&settings)?;
    let spec = SourceSpec::parse(&args.source);
    let fps = spec.resolve_fps(settings.pacing.live_fps, settings.pacing.fallback_fps);
    let mut capture = FfmpegCapture::open(spec, &settings.capture, fps)?;

    let mut session = PipelineSession::from_settings(
        args.name.clone(),
        &settings,
        &settings.counting,
        Box::new(detector),
        Arc::new(Annotator::shapes_only()),
    )
    .with_pacing(paced);
    let mut sink = DiscardSink::default();
    let summary = session.run(&mut capture, &mut sink, &stop)?;
    if session.at_capacity() {
        warn!(
            "🚨 VENUE AT CAPACITY - Current: {} | Limit: {}",
            summary.occupancy, settings.counting.threshold
        );
    }
    println!("Final count: {}", summary.occupancy);
    Ok(())
}

fn run_faces(settings: &Settings, action: FacesAction) -> Result<()> {
    let registry = FaceRegistry::new(settings.faces.dir.clone());
    match action {
        FacesAction::List => {
            let faces = registry.list()?;
            if faces.is_empty() {
                println!("(无参考人脸: {})", registry.dir().display());
            }
            for face in faces {
                println!("{}\t{}", face.label, face.path.display());
            }
        }
        FacesAction::Add { name, image } => {
            let stored = registry.add(&name, &image)?;
            println!("{}", stored.display());
        }
        FacesAction::Remove { name } => {
            let removed = registry.remove(&name)?;
            if removed == 0 {
                warn!("⚠️ 没有找到 {}", name);
            }
            println!("removed {}", removed);
        }
    }
    Ok(())
}

fn run_cameras(settings: &Settings, action: CamerasAction) -> Result<()> {
    let mut registry = CameraRegistry::load(&settings.server.cameras)?;
    match action {
        CamerasAction::List => {
            if registry.is_empty() {
                println!(
                    "(无注册摄像头, 未知流名使用 {})",
                    settings.server.source_template
                );
            }
            for (key, entry) in registry.iter() {
                println!(
                    "{}\t{}\tline={} {}\tlimit={}",
                    key, entry.source, entry.line_position, entry.direction, entry.threshold
                );
            }
        }
        CamerasAction::Add {
            key,
            source,
            line,
            direction,
            threshold,
        } => {
            let mut entry = CameraEntry::with_counting(source, &settings.counting);
            if let Some(line) = line {
                entry.line_position = line;
            }
            if let Some(direction) = direction {
                entry.direction = direction;
            }
            if let Some(threshold) = threshold {
                entry.threshold = threshold;
            }
            if registry.get(&key).is_some() {
                info!("📝 更新摄像头 {}", key);
            }
            registry.insert(key, entry);
            registry.save()?;
            println!("{} cameras", registry.len());
        }
        CamerasAction::Remove { key } => {
            if registry.remove(&key).is_none() {
                warn!("⚠️ 没有找到 {}", key);
            } else {
                registry.save()?;
            }
            println!("{} cameras", registry.len());
        }
    }
    Ok(())
}
