use ffmpeg_next as ffmpeg;
use image::GrayImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::dynamics::FrameSource;
use crate::error::{AnalysisError, MediaError, MediaResult};

/// 初始化 FFmpeg，并把库日志级别设为 ERROR，抑制警告和信息消息
pub fn init_ffmpeg() -> Result<(), ffmpeg::Error> {
    ffmpeg::init()?;
    unsafe {
        ffmpeg::sys::av_log_set_level(ffmpeg::sys::AV_LOG_ERROR as i32);
    }
    Ok(())
}

/// 视频基本信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    /// 容器时长（秒）
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    /// 平均帧率
    pub fps: f64,
    /// 标称帧数，容器没有记录时为 0
    pub frame_count: u64,
    pub has_audio: bool,
}

/// 视频处理器，负责探测视频信息和打开解码帧源
pub struct VideoProcessor {
    input_path: PathBuf,
}

impl VideoProcessor {
    pub fn new(input_path: impl AsRef<Path>) -> MediaResult<Self> {
        init_ffmpeg().map_err(|e| MediaError::Probe(format!("初始化 FFmpeg 失败: {}", e)))?;
        Ok(Self {
            input_path: input_path.as_ref().to_path_buf(),
        })
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// 获取视频信息
    pub fn get_video_info(&self) -> MediaResult<VideoInfo> {
        let ictx = ffmpeg::format::input(&self.input_path).map_err(|e| {
            MediaError::Probe(format!("无法打开视频文件 {}: {}", self.input_path.display(), e))
        })?;

        let video_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| MediaError::Probe("未找到视频流".to_string()))?;

        let decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| MediaError::Probe(format!("无法创建视频解码器: {}", e)))?;

        let has_audio = ictx.streams().best(ffmpeg::media::Type::Audio).is_some();
        let duration = container_duration(&ictx);

        Ok(VideoInfo {
            duration,
            width: decoder.width(),
            height: decoder.height(),
            fps: stream_fps(&video_stream),
            frame_count: video_stream.frames().max(0) as u64,
            has_audio,
        })
    }

    /// 打开顺序解码帧源
    pub fn open_frames(&self) -> Result<FfmpegFrameSource, AnalysisError> {
        FfmpegFrameSource::open(&self.input_path)
    }
}

/// 任意媒体文件（视频或音频）的容器时长（秒）
pub fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let path = path.as_ref();
    init_ffmpeg().map_err(|e| MediaError::Probe(format!("初始化 FFmpeg 失败: {}", e)))?;
    let ictx = ffmpeg::format::input(&path)
        .map_err(|e| MediaError::Probe(format!("无法打开媒体文件 {}: {}", path.display(), e)))?;
    Ok(container_duration(&ictx))
}

fn container_duration(ictx: &ffmpeg::format::context::Input) -> f64 {
    let duration = ictx.duration();
    if duration <= 0 {
        return 0.0;
    }
    duration as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
}

/// 优先使用平均帧率，缺失时退回 r_frame_rate
fn stream_fps(stream: &ffmpeg::format::stream::Stream) -> f64 {
    let rational_to_f64 = |r: ffmpeg::Rational| {
        if r.numerator() > 0 && r.denominator() > 0 {
            r.numerator() as f64 / r.denominator() as f64
        } else {
            0.0
        }
    };

    let avg = rational_to_f64(stream.avg_frame_rate());
    if avg > 0.0 {
        avg
    } else {
        rational_to_f64(stream.rate())
    }
}

/// 基于 FFmpeg 的顺序解码帧源
///
/// 持有唯一的解码句柄，`Drop` 时释放（包括解码失败的路径）。
pub struct FfmpegFrameSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    fps: f64,
    frame_count: u64,
    current: ffmpeg::frame::Video,
    has_current: bool,
    scaler: Option<LumaScaler>,
    eof_sent: bool,
}

/// 缓存的灰度缩放器，输入尺寸或格式变化时重建
struct LumaScaler {
    context: ffmpeg::software::scaling::Context,
    src: (ffmpeg::format::Pixel, u32, u32),
    dst: (u32, u32),
}

impl FfmpegFrameSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref().to_path_buf();
        let decode_err = |message: String| AnalysisError::video_decode(&path, message);

        init_ffmpeg().map_err(|e| decode_err(format!("初始化 FFmpeg 失败: {}", e)))?;

        let input = ffmpeg::format::input(&path)
            .map_err(|e| decode_err(format!("无法打开视频文件: {}", e)))?;

        let (stream_index, fps, frame_count, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| decode_err("未找到视频流".to_string()))?;
            (
                stream.index(),
                stream_fps(&stream),
                stream.frames().max(0) as u64,
                stream.parameters(),
            )
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| decode_err(format!("无法创建视频解码器: {}", e)))?;

        debug!(
            "🎞️  [解码] 打开视频: {} ({}x{}, {:.2} fps, {} 帧)",
            path.display(),
            decoder.width(),
            decoder.height(),
            fps,
            frame_count
        );

        Ok(Self {
            path,
            input,
            decoder,
            stream_index,
            fps,
            frame_count,
            current: ffmpeg::frame::Video::empty(),
            has_current: false,
            scaler: None,
            eof_sent: false,
        })
    }

    fn decode_error(&self, message: impl Into<String>) -> AnalysisError {
        AnalysisError::video_decode(&self.path, message)
    }
}

impl FrameSource for FfmpegFrameSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn advance(&mut self) -> Result<bool, AnalysisError> {
        loop {
            match receive_outcome(self.decoder.receive_frame(&mut self.current)) {
                ReceiveOutcome::Frame => {
                    self.has_current = true;
                    return Ok(true);
                }
                ReceiveOutcome::Drained => {
                    self.has_current = false;
                    return Ok(false);
                }
                ReceiveOutcome::Failed(e) => {
                    self.has_current = false;
                    return Err(self.decode_error(format!("解码帧失败: {}", e)));
                }
                ReceiveOutcome::NeedInput => {}
            }

            // EAGAIN 在发送 EOF 之后不应出现
            if self.eof_sent {
                return Err(self.decode_error("解码器在 EOF 之后仍要求输入"));
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| self.decode_error(format!("发送数据包失败: {}", e)))?;
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| self.decode_error(format!("刷新解码器失败: {}", e)))?;
                    self.eof_sent = true;
                }
                Err(e) => {
                    return Err(self.decode_error(format!("读取数据包失败: {}", e)));
                }
            }
        }
    }

    fn current_luma(&mut self, width: u32, height: u32) -> Result<GrayImage, AnalysisError> {
        if !self.has_current {
            return Err(self.decode_error("没有可读取的当前帧"));
        }

        let src = (
            self.current.format(),
            self.current.width(),
            self.current.height(),
        );
        let needs_rebuild = self
            .scaler
            .as_ref()
            .map_or(true, |s| s.src != src || s.dst != (width, height));
        if needs_rebuild {
            let context = ffmpeg::software::scaling::Context::get(
                src.0,
                src.1,
                src.2,
                ffmpeg::format::Pixel::GRAY8,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| self.decode_error(format!("无法创建缩放器: {}", e)))?;
            self.scaler = Some(LumaScaler {
                context,
                src,
                dst: (width, height),
            });
        }

        let mut gray_frame = ffmpeg::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .context
                .run(&self.current, &mut gray_frame)
                .map_err(|e| AnalysisError::video_decode(&self.path, format!("灰度转换失败: {}", e)))?;
        }

        gray_frame_to_image(&gray_frame, width, height)
            .ok_or_else(|| self.decode_error("灰度帧数据不完整"))
    }
}

/// `receive_frame` 的结果分类
#[derive(Debug)]
enum ReceiveOutcome {
    Frame,
    /// EAGAIN：需要继续送入数据包
    NeedInput,
    /// EOF：解码器已经输出全部帧
    Drained,
    Failed(ffmpeg::Error),
}

fn receive_outcome(result: Result<(), ffmpeg::Error>) -> ReceiveOutcome {
    match result {
        Ok(()) => ReceiveOutcome::Frame,
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
            ReceiveOutcome::NeedInput
        }
        Err(ffmpeg::Error::Eof) => ReceiveOutcome::Drained,
        Err(e) => ReceiveOutcome::Failed(e),
    }
}

/// 按行拷贝 GRAY8 帧（行跨度可能大于宽度）
fn gray_frame_to_image(frame: &ffmpeg::frame::Video, width: u32, height: u32) -> Option<GrayImage> {
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_len = width as usize;

    let mut buf = Vec::with_capacity(row_len * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        buf.extend_from_slice(data.get(start..start + row_len)?);
    }
    GrayImage::from_raw(width, height, buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_outcome_classification() {
        assert!(matches!(receive_outcome(Ok(())), ReceiveOutcome::Frame));
        assert!(matches!(
            receive_outcome(Err(ffmpeg::Error::Other {
                errno: ffmpeg::util::error::EAGAIN
            })),
            ReceiveOutcome::NeedInput
        ));
        assert!(matches!(
            receive_outcome(Err(ffmpeg::Error::Eof)),
            ReceiveOutcome::Drained
        ));
    }

    #[test]
    fn test_invalid_data_after_eof_is_an_error() {
        // 截断的码流在刷新解码器时返回 InvalidData，不能当作正常结束
        assert!(matches!(
            receive_outcome(Err(ffmpeg::Error::InvalidData)),
            ReceiveOutcome::Failed(ffmpeg::Error::InvalidData)
        ));
        assert!(matches!(
            receive_outcome(Err(ffmpeg::Error::Other { errno: 5 })),
            ReceiveOutcome::Failed(_)
        ));
    }
}
