use std::path::PathBuf;
use thiserror::Error;

/// 视频动态分析错误
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// 无法打开或解码视频（包括解码中途失败），不返回部分结果
    #[error("视频解码失败: {path}: {message}")]
    VideoDecode { path: PathBuf, message: String },
}

impl AnalysisError {
    pub fn video_decode(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::VideoDecode {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type MediaResult<T> = Result<T, MediaError>;

/// 媒体处理（探测、合并、提取、延长音频）错误
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg 命令失败: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("探测媒体信息失败: {0}")]
    Probe(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }
}

/// AI 音乐生成错误
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("没有可用的 AI 音乐服务，请设置 REPLICATE_API_TOKEN 或 MUBERT_LICENSE")]
    NoServiceAvailable,

    /// 已配置的服务全部失败，携带最后一个服务的错误
    #[error("所有 AI 音乐服务均失败，最后的错误: {last}")]
    AllServicesFailed { last: Box<GenerationError> },

    #[error("{service} 生成失败: {message}")]
    Failed { service: &'static str, message: String },

    #[error("{service} 生成超时（{waited_secs}秒）")]
    TimedOut { service: &'static str, waited_secs: u64 },

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl GenerationError {
    pub fn failed(service: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            service,
            message: message.into(),
        }
    }
}
