use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::MusicConfig;
use crate::error::GenerationError;
use crate::media;
use crate::prompt::style_fallback_prompt;

/// MusicGen 单次生成的最长时长（秒）
pub const MUSICGEN_MAX_SECS: u32 = 30;
/// Mubert 免费接口单次生成的最长时长（秒）
pub const MUBERT_MAX_SECS: u32 = 60;

/// 发给音乐生成服务的请求
#[derive(Debug, Clone)]
pub struct MusicRequest {
    /// 根据视频分析生成的提示词，为空时使用风格默认提示词
    pub prompt: Option<String>,
    pub style: String,
    /// 目标时长（秒）
    pub duration_seconds: u32,
    /// 可选的参考音频，用于旋律引导
    pub reference_audio: Option<PathBuf>,
}

/// Replicate prediction 响应
#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Prediction {
    /// output 可能是字符串，也可能是字符串数组
    fn output_url(&self) -> Option<String> {
        match self.output.as_ref()? {
            Value::String(url) => Some(url.clone()),
            Value::Array(items) => items.first()?.as_str().map(str::to_string),
            _ => None,
        }
    }
}

/// Mubert 风格标签，第一个标签作为生成模式
fn mubert_tags(style: &str) -> String {
    let tags = match style {
        "energetic" => "energetic,electronic,upbeat,modern",
        "epic" => "epic,cinematic,powerful,dramatic",
        "ambient" => "ambient,chill,atmospheric,calm",
        "happy" => "happy,uplifting,positive,fun",
        "chill" => "chill,lofi,relaxed,smooth",
        "dramatic" => "dramatic,intense,emotional,dark",
        "upbeat" => "upbeat,dance,energetic,fun",
        "inspiring" => "inspiring,uplifting,motivational,hopeful",
        "cinematic" => "cinematic,epic,orchestral,grand",
        "electronic" => "electronic,edm,synth,modern",
        "hip-hop" => "hiphop,urban,beats,modern",
        "lofi" => "lofi,chill,jazzy,relaxed",
        "rock" => "rock,energetic,powerful,electric",
        other => return format!("{},instrumental,modern", other),
    };
    tags.to_string()
}

/// 根据扩展名确定参考音频的 MIME 类型
fn reference_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mp3",
        _ => "audio/mpeg",
    }
}

/// 从 Mubert 响应中找下载链接
fn mubert_download_link(data: &Value) -> Option<String> {
    data.get("tasks")
        .and_then(|tasks| tasks.get(0))
        .and_then(|task| task.get("download_link"))
        .and_then(Value::as_str)
        .or_else(|| {
            ["link", "url", "download_link"]
                .iter()
                .find_map(|key| data.get(*key).and_then(Value::as_str))
        })
        .map(str::to_string)
}

/// AI 音乐生成器：优先使用 Replicate MusicGen，失败后尝试 Mubert
pub struct MusicGenerator {
    client: reqwest::Client,
    config: MusicConfig,
}

impl MusicGenerator {
    pub fn new(config: MusicConfig) -> Self {
        if config.replicate_api_token.is_some() {
            info!("✓ [音乐生成] 已加载 Replicate API Token");
        } else {
            warn!("✗ [音乐生成] 未设置 REPLICATE_API_TOKEN，只能使用备用服务");
        }

        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// 生成音乐并写入 `output_path`
    pub async fn generate(
        &self,
        request: &MusicRequest,
        output_path: &Path,
    ) -> Result<PathBuf, GenerationError> {
        info!(
            "🎵 [音乐生成] 生成 {} 风格音乐（{}秒）",
            request.style, request.duration_seconds
        );
        if let Some(prompt) = &request.prompt {
            info!("📝 [音乐生成] 提示词: {}", prompt);
        }

        let mut last_error = None;

        if let Some(token) = &self.config.replicate_api_token {
            match self.generate_with_musicgen(token, request, output_path).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    warn!("⚠️  [音乐生成] MusicGen 失败: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if let Some(pat) = &self.config.mubert_pat {
            match self.generate_with_mubert(pat, request, output_path).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    warn!("⚠️  [音乐生成] Mubert 失败: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(last) => GenerationError::AllServicesFailed {
                last: Box::new(last),
            },
            None => GenerationError::NoServiceAvailable,
        })
    }

    async fn generate_with_musicgen(
        &self,
        token: &str,
        request: &MusicRequest,
        output_path: &Path,
    ) -> Result<PathBuf, GenerationError> {
        let prompt = request
            .prompt
            .clone()
            .unwrap_or_else(|| style_fallback_prompt(&request.style));

        let model_version = if request.reference_audio.is_some() {
            "stereo-melody-large"
        } else {
            "stereo-large"
        };
        let mut input = json!({
            "prompt": prompt,
            "duration": request.duration_seconds.min(MUSICGEN_MAX_SECS),
            "model_version": model_version,
            "output_format": "wav",
            "normalization_strategy": "loudness",
        });

        if let Some(reference) = &request.reference_audio {
            let audio_data = tokio::fs::read(reference).await?;
            let audio_b64 = base64::engine::general_purpose::STANDARD.encode(audio_data);
            input["melody"] = Value::String(format!(
                "data:{};base64,{}",
                reference_mime(reference),
                audio_b64
            ));
            info!("🎼 [音乐生成] 已附加参考音频用于旋律引导");
        }

        let auth = format!("Token {}", token);
        let base_url = self.config.replicate_base_url.trim_end_matches('/');

        let prediction: Prediction = self
            .client
            .post(format!("{}/v1/predictions", base_url))
            .header("Authorization", &auth)
            .json(&json!({
                "version": self.config.model_version,
                "input": input,
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!("⏳ [音乐生成] Prediction 已创建: {}", prediction.id);

        let status_url = format!("{}/v1/predictions/{}", base_url, prediction.id);
        let mut waited = Duration::ZERO;

        while waited < self.config.max_wait {
            tokio::time::sleep(self.config.poll_interval).await;
            waited += self.config.poll_interval;

            let result: Prediction = self
                .client
                .get(&status_url)
                .header("Authorization", &auth)
                .timeout(Duration::from_secs(30))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            match result.status.as_str() {
                "succeeded" => {
                    let audio_url = result
                        .output_url()
                        .ok_or_else(|| GenerationError::failed("MusicGen", "响应中没有音频地址"))?;

                    info!("⬇️  [音乐生成] 正在下载生成的音频...");
                    self.download(&audio_url, output_path, Duration::from_secs(60))
                        .await?;

                    if request.duration_seconds > MUSICGEN_MAX_SECS {
                        extend_in_background(output_path, request.duration_seconds).await?;
                    }

                    info!("✅ [音乐生成] MusicGen 生成完成");
                    return Ok(output_path.to_path_buf());
                }
                "failed" | "canceled" => {
                    let message = result
                        .error
                        .map(|e| match e {
                            Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Err(GenerationError::failed("MusicGen", message));
                }
                status => {
                    info!("⏳ [音乐生成] 生成中... ({}, {}s)", status, waited.as_secs());
                }
            }
        }

        Err(GenerationError::TimedOut {
            service: "MusicGen",
            waited_secs: waited.as_secs(),
        })
    }

    async fn generate_with_mubert(
        &self,
        pat: &str,
        request: &MusicRequest,
        output_path: &Path,
    ) -> Result<PathBuf, GenerationError> {
        let tags = mubert_tags(&request.style);
        let mode = tags.split(',').next().unwrap_or("ambient");
        info!("🤖 [音乐生成] 使用 Mubert: {}", tags);

        let response: Value = self
            .client
            .post(format!(
                "{}/v2/RecordTrack",
                self.config.mubert_base_url.trim_end_matches('/')
            ))
            .json(&json!({
                "method": "RecordTrack",
                "params": {
                    "pat": pat,
                    "mode": mode,
                    "duration": request.duration_seconds.min(MUBERT_MAX_SECS),
                }
            }))
            .timeout(Duration::from_secs(60))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.get("status").and_then(Value::as_i64) != Some(1) {
            return Err(GenerationError::failed(
                "Mubert",
                format!("响应状态异常: {}", response),
            ));
        }

        let data = response.get("data").cloned().unwrap_or(Value::Null);
        let download_url = mubert_download_link(&data)
            .ok_or_else(|| GenerationError::failed("Mubert", format!("响应中没有下载地址: {}", data)))?;

        info!("⬇️  [音乐生成] 正在从 Mubert 下载...");
        self.download(&download_url, output_path, Duration::from_secs(90))
            .await?;

        if request.duration_seconds > MUBERT_MAX_SECS {
            extend_in_background(output_path, request.duration_seconds).await?;
        }

        info!("✅ [音乐生成] Mubert 生成完成");
        Ok(output_path.to_path_buf())
    }

    async fn download(
        &self,
        url: &str,
        output_path: &Path,
        timeout: Duration,
    ) -> Result<(), GenerationError> {
        let bytes = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        tokio::fs::write(output_path, &bytes).await?;
        Ok(())
    }
}

/// ffmpeg 延长音频是阻塞操作，放到阻塞线程池执行
async fn extend_in_background(path: &Path, target_secs: u32) -> Result<(), GenerationError> {
    info!("🔄 [音乐生成] 延长音频到 {}秒", target_secs);
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || media::extend_audio(&path, target_secs))
        .await
        .map_err(|e| GenerationError::failed("ffmpeg", format!("延长音频任务异常: {}", e)))??;
    Ok(())
}
