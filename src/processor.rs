use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::analyzer::analyze_video_dynamics;
use crate::config::AppConfig;
use crate::media;
use crate::music_generator::{MusicGenerator, MusicRequest};
use crate::pace::VideoAnalysis;
use crate::prompt::build_music_prompt;

/// 支持上传的视频扩展名
pub const ALLOWED_VIDEO_EXTENSIONS: [&str; 4] = [".mp4", ".mov", ".avi", ".mkv"];

/// 文件名是否为支持的视频格式（不区分大小写）
pub fn is_video_file(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .map_or(false, |ext| ALLOWED_VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// 输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// 带音乐的视频
    #[default]
    Video,
    /// 只有音乐
    Audio,
    /// 视频和音乐打包成 ZIP
    Both,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "video" => Ok(OutputFormat::Video),
            "audio" => Ok(OutputFormat::Audio),
            "both" => Ok(OutputFormat::Both),
            other => Err(format!("不支持的输出格式: {}，可选: video, audio, both", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Video => "video",
            OutputFormat::Audio => "audio",
            OutputFormat::Both => "both",
        })
    }
}

/// 单个任务的临时文件，`Drop` 时全部删除
pub struct JobWorkspace {
    job_id: String,
    upload_dir: PathBuf,
    output_dir: PathBuf,
    tracked: Vec<PathBuf>,
}

impl JobWorkspace {
    pub fn new(config: &AppConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.upload_dir)?;
        std::fs::create_dir_all(&config.output_dir)?;
        Ok(Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            upload_dir: config.upload_dir.clone(),
            output_dir: config.output_dir.clone(),
            tracked: Vec::new(),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// 上传文件的存放路径（只保留文件名部分）
    pub fn upload_path(&mut self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        let path = self.upload_dir.join(format!("{}_{}", self.job_id, name));
        self.track(path)
    }

    /// 生成文件的存放路径
    pub fn output_path(&mut self, suffix: &str) -> PathBuf {
        let path = self.output_dir.join(format!("{}_{}", self.job_id, suffix));
        self.track(path)
    }

    /// 记录额外产生的文件（例如扩展名变化后的提取音频）
    pub fn track(&mut self, path: PathBuf) -> PathBuf {
        if !self.tracked.contains(&path) {
            self.tracked.push(path.clone());
        }
        path
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        for path in &self.tracked {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    debug!("清理临时文件失败 {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// 一次处理任务的输入
#[derive(Debug, Clone)]
pub struct ReelJob {
    /// 已保存的视频路径
    pub video_path: PathBuf,
    /// 用户上传时的文件名
    pub original_filename: String,
    pub style: String,
    pub remove_original_audio: bool,
    /// 已保存的参考音频或参考视频
    pub reference_path: Option<PathBuf>,
    pub output_format: OutputFormat,
}

/// 最终交付的文件
#[derive(Debug, Clone)]
pub struct ReelArtifact {
    pub path: PathBuf,
    pub media_type: &'static str,
    /// 下载文件名
    pub filename: String,
}

/// 处理结果
#[derive(Debug, Clone)]
pub struct ReelOutput {
    pub artifact: ReelArtifact,
    pub analysis: VideoAnalysis,
    pub prompt: String,
    /// 请求的音乐时长（秒）
    pub music_duration: u32,
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("reel")
        .to_string()
}

/// 各输出格式的下载文件名
pub fn artifact_filename(format: OutputFormat, original_filename: &str) -> String {
    let name = Path::new(original_filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("reel.mp4");
    match format {
        OutputFormat::Video => format!("reel_with_music_{}", name),
        OutputFormat::Audio => format!("reel_music_{}.wav", file_stem(name)),
        OutputFormat::Both => format!("reel_package_{}.zip", file_stem(name)),
    }
}

/// 把多个文件以 deflate 压缩写入 ZIP
pub fn package_zip(zip_path: &Path, entries: &[(PathBuf, String)]) -> Result<()> {
    let file = File::create(zip_path)
        .with_context(|| format!("创建 ZIP 文件失败: {}", zip_path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (path, name) in entries {
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("写入 ZIP 条目失败: {}", name))?;
        let mut source =
            File::open(path).with_context(|| format!("打开文件失败: {}", path.display()))?;
        std::io::copy(&mut source, &mut zip)
            .with_context(|| format!("写入 ZIP 条目失败: {}", name))?;
    }

    zip.finish().context("完成 ZIP 文件失败")?;
    Ok(())
}

/// 在阻塞线程池执行同步的 FFmpeg 操作
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("后台任务异常退出")?
}

/// 处理一个视频：分析节奏 → 生成音乐 → 合并 → 按输出格式打包
pub async fn process_reel(
    job: &ReelJob,
    workspace: &mut JobWorkspace,
    generator: &MusicGenerator,
) -> Result<ReelOutput> {
    let total_start = Instant::now();
    info!("🎬 [任务 {}] 开始处理视频: {}", workspace.job_id(), job.original_filename);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. 参考素材：视频需要先提取音频
    let reference_audio = match &job.reference_path {
        Some(reference) if is_video_file(&reference.to_string_lossy()) => {
            info!("🎬 [任务] 参考素材是视频，正在提取音频...");
            let target = workspace.output_path("reference_audio.mp3");
            let source = reference.clone();
            let extracted = blocking(move || Ok(media::extract_audio(&source, &target)?))
                .await
                .context("提取参考音频失败")?;
            info!("✅ [任务] 参考音频提取完成");
            Some(workspace.track(extracted))
        }
        Some(reference) => {
            info!("📀 [任务] 使用参考音频: {}", reference.display());
            Some(reference.clone())
        }
        None => None,
    };

    // 2. 获取视频信息
    let video_path = job.video_path.clone();
    let info = blocking(move || Ok(media::probe_video(&video_path)?))
        .await
        .context("获取视频信息失败")?;
    let music_duration = info.duration as u32 + 1;
    info!("  • 分辨率: {}x{}", info.width, info.height);
    info!("  • 帧率: {:.2} fps", info.fps);
    info!("  • 时长: {:.2}秒（音乐 {}秒）", info.duration, music_duration);

    // 3. 分析视频动态
    let video_path = job.video_path.clone();
    let analysis = blocking(move || Ok(analyze_video_dynamics(&video_path)?))
        .await
        .context("视频动态分析失败")?;
    let prompt = build_music_prompt(&analysis, &job.style);
    info!(
        "📊 [任务] 视频分析: {} 节奏, {} 个场景切换",
        analysis.overall_pace, analysis.num_scenes
    );
    info!("📝 [任务] 提示词: {}", prompt);

    // 4. 生成音乐
    let music_start = Instant::now();
    let music_path = workspace.output_path("music.wav");
    let request = MusicRequest {
        prompt: Some(prompt.clone()),
        style: job.style.clone(),
        duration_seconds: music_duration,
        reference_audio,
    };
    generator.generate(&request, &music_path).await.map_err(|e| {
        error!("❌ [任务] 音乐生成失败: {}", e);
        anyhow::Error::new(e)
    })?;
    info!(
        "✅ [任务] 音乐生成完成，耗时: {:.2}秒",
        music_start.elapsed().as_secs_f64()
    );

    // 5. 合并音视频
    let final_path = workspace.output_path("final.mp4");
    let (video_path, audio_path, output_path) =
        (job.video_path.clone(), music_path.clone(), final_path.clone());
    let remove_original_audio = job.remove_original_audio;
    blocking(move || {
        Ok(media::merge_audio_video(
            &video_path,
            &audio_path,
            &output_path,
            remove_original_audio,
        )?)
    })
    .await
    .context("合并音视频失败")?;

    // 6. 按输出格式交付
    let filename = artifact_filename(job.output_format, &job.original_filename);
    let artifact = match job.output_format {
        OutputFormat::Video => ReelArtifact {
            path: final_path,
            media_type: "video/mp4",
            filename,
        },
        OutputFormat::Audio => ReelArtifact {
            path: music_path,
            media_type: "audio/wav",
            filename,
        },
        OutputFormat::Both => {
            let zip_path = workspace.output_path("package.zip");
            let entries = vec![
                (
                    final_path,
                    artifact_filename(OutputFormat::Video, &job.original_filename),
                ),
                (
                    music_path,
                    artifact_filename(OutputFormat::Audio, &job.original_filename),
                ),
            ];
            let target = zip_path.clone();
            blocking(move || package_zip(&target, &entries)).await?;
            ReelArtifact {
                path: zip_path,
                media_type: "application/zip",
                filename,
            }
        }
    };

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "🎉 [任务 {}] 处理完成！总耗时: {:.2}秒",
        workspace.job_id(),
        total_start.elapsed().as_secs_f64()
    );

    Ok(ReelOutput {
        artifact,
        analysis,
        prompt,
        music_duration,
    })
}
