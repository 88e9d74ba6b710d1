// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 人脸比对 (Face matching)
//!
//! 比对模型在外部 HTTP 服务中运行, 这里只负责:
//! - 参考人脸目录的增删查 (文件名即身份)
//! - 把现场截图和参考图以 data URI 形式提交给 verify 接口

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use image::RgbImage;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::output::encode_jpeg;

/// 允许的参考图扩展名
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// 比对结果
#[derive(Clone, Debug, PartialEq)]
pub struct MatchVerdict {
    pub verified: bool,
    pub distance: Option<f64>,
}

/// 人脸比对接口
pub trait FaceMatcher: Send {
    fn verify(&self, live: &RgbImage, reference: &Path) -> Result<MatchVerdict>;
}

#[derive(Deserialize)]
struct VerifyResponse {
    verified: bool,
    #[serde(default)]
    distance: Option<f64>,
}

/// HTTP 人脸比对客户端 (img1_path / img2_path 以 base64 data URI 提交)
pub struct HttpFaceMatcher {
    agent: ureq::Agent,
    url: String,
}

impl HttpFaceMatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            url: url.into(),
        }
    }
}

impl FaceMatcher for HttpFaceMatcher {
    fn verify(&self, live: &RgbImage, reference: &Path) -> Result<MatchVerdict> {
        let live_jpeg = encode_jpeg(live, 90).context("encode live crop")?;
        let reference_bytes = fs::read(reference)
            .with_context(|| format!("read reference {}", reference.display()))?;

        let body = serde_json::json!({
            "img1_path": data_uri("image/jpeg", &live_jpeg),
            "img2_path": data_uri(mime_for(reference), &reference_bytes),
            "enforce_detection": false,
        });
        let response: VerifyResponse = self
            .agent
            .post(&self.url)
            .send_json(body)
            .with_context(|| format!("POST {}", self.url))?
            .into_json()
            .context("decode verify response")?;

        debug!(
            "🧑 比对 {} → verified={} distance={:?}",
            reference.display(),
            response.verified,
            response.distance
        );
        Ok(MatchVerdict {
            verified: response.verified,
            distance: response.distance,
        })
    }
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn mime_for(path: &Path) -> &'static str {
    match extension_of(path).as_deref() {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// 参考人脸
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceFace {
    /// 展示用身份名
    pub label: String,
    pub path: PathBuf,
}

/// 参考人脸目录
pub struct FaceRegistry {
    dir: PathBuf,
}

impl FaceRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 列出全部参考人脸 (目录不存在视为空)
    pub fn list(&self) -> Result<Vec<ReferenceFace>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("list {}", self.dir.display())),
        };

        let mut faces = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let allowed = extension_of(&path)
                .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or(false);
            if !path.is_file() || !allowed {
                continue;
            }
            let Some(stem) = stem_of(&path) else {
                continue;
            };
            faces.push(ReferenceFace {
                label: identity_label(stem),
                path,
            });
        }
        faces.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(faces)
    }

    /// 拷贝一张参考图进目录, 文件名为规范化后的姓名
    pub fn add(&self, name: &str, image: &Path) -> Result<PathBuf> {
        let stem = sanitize_name(name)?;
        if stem.is_empty() {
            bail!("name '{}' has no usable characters", name);
        }
        let ext = extension_of(image)
            .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| {
                anyhow!(
                    "{} is not one of {}",
                    image.display(),
                    ALLOWED_EXTENSIONS.join(", ")
                )
            })?;

        // 同名参考人脸已存在时拒绝, 不覆盖 (不同扩展名也算同名)
        let duplicate = self
            .list()?
            .into_iter()
            .find(|face| stem_of(&face.path) == Some(stem.as_str()));
        if let Some(existing) = duplicate {
            bail!(
                "a face named '{}' already exists: {}",
                stem,
                existing.path.display()
            );
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {}", self.dir.display()))?;
        let target = self.dir.join(format!("{}.{}", stem, ext));
        fs::copy(image, &target)
            .with_context(|| format!("copy {} to {}", image.display(), target.display()))?;
        info!("➕ 已添加参考人脸: {} → {}", identity_label(&stem), target.display());
        Ok(target)
    }

    /// 删除该姓名的全部参考图, 返回删除数量
    pub fn remove(&self, name: &str) -> Result<usize> {
        let stem = sanitize_name(name)?;
        let mut removed = 0;
        for face in self.list()? {
            if stem_of(&face.path) == Some(stem.as_str()) {
                fs::remove_file(&face.path)
                    .with_context(|| format!("remove {}", face.path.display()))?;
                info!("➖ 已删除参考人脸: {}", face.path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// 姓名 → 文件名: 小写, 空格转下划线, 只保留 [a-z0-9_]
fn stem_of(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

pub fn sanitize_name(name: &str) -> Result<String> {
    let re = Regex::new(r"[^a-z0-9_]")?;
    let lowered = name.to_lowercase().replace(' ', "_");
    Ok(re.replace_all(&lowered, "").into_owned())
}

/// 文件名 → 身份名: 下划线转空格, 每个单词首字母大写
pub fn identity_label(stem: &str) -> String {
    let mut label = String::with_capacity(stem.len());
    let mut prev_alpha = false;
    for ch in stem.replace('_', " ").chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                label.extend(ch.to_lowercase());
            } else {
                label.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            label.push(ch);
            prev_alpha = false;
        }
    }
    label
}
