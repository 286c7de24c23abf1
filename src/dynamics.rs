use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use serde::Serialize;
use tracing::debug;

use crate::error::AnalysisError;

/// 每隔多少个解码帧采样一次
pub const SAMPLE_STRIDE: u64 = 5;
/// 分析用灰度图宽度
pub const ANALYSIS_WIDTH: u32 = 320;
/// 分析用灰度图高度
pub const ANALYSIS_HEIGHT: u32 = 240;
/// 差异分数超过该值即视为场景切换候选
pub const SCENE_CHANGE_THRESHOLD: f64 = 30.0;

/// 单个采样点的运动信息
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoDynamicsSample {
    /// 采样帧在解码顺序中的帧号
    pub sample_index: u64,
    /// 采样帧时间戳（秒）
    pub timestamp_seconds: f64,
    /// 与上一个采样帧的平均绝对亮度差（0-255）
    pub diff_score: f64,
}

/// 按解码顺序逐帧读取的帧源
///
/// 只会顺序前进，不会回退。`current_luma` 只在采样帧上调用，
/// 非采样帧只需要解码、不需要转换。
pub trait FrameSource {
    /// 标称帧率，未知时返回 0
    fn fps(&self) -> f64;

    /// 标称总帧数，未知时返回 0
    fn frame_count(&self) -> u64;

    /// 解码下一帧，读到结尾返回 `false`
    fn advance(&mut self) -> Result<bool, AnalysisError>;

    /// 把当前帧转换成指定尺寸的单通道亮度图
    fn current_luma(&mut self, width: u32, height: u32) -> Result<GrayImage, AnalysisError>;
}

/// 一次采样得到的运动信号
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicsSignal {
    /// 每次比较产生一个采样（第一帧只作为基准，不产生采样）
    pub samples: Vec<VideoDynamicsSample>,
    /// 场景切换候选时间戳（秒），升序
    pub scene_candidates: Vec<f64>,
    /// 差异分数累加和
    pub score_sum: f64,
    /// 实际解码的帧数
    pub frames_decoded: u64,
}

impl DynamicsSignal {
    /// 平均差异分数，没有采样时返回 `None`
    pub fn mean_score(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.score_sum / self.samples.len() as f64)
        }
    }
}

/// 运动采样器：固定步长采样、灰度缩放、与上一采样帧求差
#[derive(Debug, Clone)]
pub struct DynamicsSampler {
    stride: u64,
    width: u32,
    height: u32,
    threshold: f64,
}

impl Default for DynamicsSampler {
    fn default() -> Self {
        Self {
            stride: SAMPLE_STRIDE,
            width: ANALYSIS_WIDTH,
            height: ANALYSIS_HEIGHT,
            threshold: SCENE_CHANGE_THRESHOLD,
        }
    }
}

impl DynamicsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 顺序读完整个帧源，返回运动信号
    ///
    /// 任何解码错误都会立即返回，不产生部分结果。
    pub fn sample<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<DynamicsSignal, AnalysisError> {
        let fps = source.fps();
        let mut signal = DynamicsSignal::default();
        let mut prev: Option<GrayImage> = None;
        let mut frame_idx: u64 = 0;

        while source.advance()? {
            if frame_idx % self.stride == 0 {
                let gray = source.current_luma(self.width, self.height)?;

                if let Some(prev_gray) = prev.as_ref() {
                    let diff_score = mean_abs_diff(prev_gray, &gray);
                    let timestamp_seconds = if fps > 0.0 {
                        frame_idx as f64 / fps
                    } else {
                        0.0
                    };

                    signal.score_sum += diff_score;
                    signal.samples.push(VideoDynamicsSample {
                        sample_index: frame_idx,
                        timestamp_seconds,
                        diff_score,
                    });

                    if diff_score > self.threshold {
                        debug!(
                            "🎬 [运动采样] 场景切换候选: 帧 {} ({:.2}s), 差异 {:.2}",
                            frame_idx, timestamp_seconds, diff_score
                        );
                        signal.scene_candidates.push(timestamp_seconds);
                    }
                }

                prev = Some(gray);
            }

            frame_idx += 1;
        }

        signal.frames_decoded = frame_idx;
        Ok(signal)
    }
}

/// 两张亮度图的平均绝对像素差（0-255）
pub fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f64 {
    debug_assert_eq!(a.dimensions(), b.dimensions());

    let mut diff_sum = 0u64;
    let mut pixels = 0u64;
    for (p1, p2) in a.as_raw().iter().zip(b.as_raw().iter()) {
        diff_sum += (*p1 as i32 - *p2 as i32).unsigned_abs() as u64;
        pixels += 1;
    }

    if pixels == 0 {
        return 0.0;
    }
    diff_sum as f64 / pixels as f64
}

/// 转灰度并缩放到分析分辨率（已是目标尺寸时不再缩放）
pub fn downscale_luma(image: &DynamicImage, width: u32, height: u32) -> GrayImage {
    let gray = image.to_luma8();
    if gray.dimensions() == (width, height) {
        gray
    } else {
        imageops::resize(&gray, width, height, FilterType::Triangle)
    }
}

/// 内存帧源，用于已经解码好的图像序列
pub struct MemoryFrameSource {
    frames: Vec<DynamicImage>,
    fps: f64,
    cursor: Option<usize>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<DynamicImage>, fps: f64) -> Self {
        Self {
            frames,
            fps,
            cursor: None,
        }
    }
}

impl FrameSource for MemoryFrameSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn advance(&mut self) -> Result<bool, AnalysisError> {
        let next = self.cursor.map_or(0, |i| i + 1);
        self.cursor = Some(next);
        Ok(next < self.frames.len())
    }

    fn current_luma(&mut self, width: u32, height: u32) -> Result<GrayImage, AnalysisError> {
        let frame = self
            .cursor
            .and_then(|i| self.frames.get(i))
            .ok_or_else(|| AnalysisError::video_decode("<memory>", "没有可读取的当前帧"))?;
        Ok(downscale_luma(frame, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    fn flat(luma: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(ImageBuffer::from_pixel(
            ANALYSIS_WIDTH,
            ANALYSIS_HEIGHT,
            Luma([luma]),
        ))
    }

    #[test]
    fn test_mean_abs_diff() {
        let a = flat(100).to_luma8();
        let b = flat(140).to_luma8();
        assert_eq!(mean_abs_diff(&a, &b), 40.0);
        assert_eq!(mean_abs_diff(&b, &a), 40.0);
        assert_eq!(mean_abs_diff(&a, &a), 0.0);
    }

    #[test]
    fn test_samples_every_fifth_frame() {
        // 帧 0 作为基准，帧 5 和帧 10 与前一采样帧比较
        let mut frames = Vec::new();
        for i in 0..11u8 {
            frames.push(flat(i * 10));
        }
        let mut source = MemoryFrameSource::new(frames, 5.0);
        let signal = DynamicsSampler::new().sample(&mut source).unwrap();

        let indices: Vec<u64> = signal.samples.iter().map(|s| s.sample_index).collect();
        assert_eq!(indices, vec![5, 10]);
        assert_eq!(signal.samples[0].timestamp_seconds, 1.0);
        assert_eq!(signal.samples[0].diff_score, 50.0);
        assert_eq!(signal.frames_decoded, 11);
        assert_eq!(signal.scene_candidates, vec![1.0, 2.0]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let frames = vec![flat(0), flat(0), flat(0), flat(0), flat(0), flat(30)];
        let mut source = MemoryFrameSource::new(frames, 5.0);
        let signal = DynamicsSampler::new().sample(&mut source).unwrap();

        assert_eq!(signal.samples.len(), 1);
        assert_eq!(signal.samples[0].diff_score, 30.0);
        assert!(signal.scene_candidates.is_empty());
    }

    #[test]
    fn test_single_frame_yields_no_samples() {
        let mut source = MemoryFrameSource::new(vec![flat(200)], 30.0);
        let signal = DynamicsSampler::new().sample(&mut source).unwrap();
        assert!(signal.samples.is_empty());
        assert_eq!(signal.mean_score(), None);
        assert_eq!(signal.frames_decoded, 1);
    }

    #[test]
    fn test_downscale_large_frame() {
        let big = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(640, 480, Luma([77u8])));
        let small = downscale_luma(&big, ANALYSIS_WIDTH, ANALYSIS_HEIGHT);
        assert_eq!(small.dimensions(), (ANALYSIS_WIDTH, ANALYSIS_HEIGHT));
    }

    struct FailingSource {
        frames_left: u32,
    }

    impl FrameSource for FailingSource {
        fn fps(&self) -> f64 {
            25.0
        }

        fn frame_count(&self) -> u64 {
            100
        }

        fn advance(&mut self) -> Result<bool, AnalysisError> {
            if self.frames_left == 0 {
                return Err(AnalysisError::video_decode("broken.mp4", "数据包损坏"));
            }
            self.frames_left -= 1;
            Ok(true)
        }

        fn current_luma(&mut self, width: u32, height: u32) -> Result<GrayImage, AnalysisError> {
            Ok(GrayImage::new(width, height))
        }
    }

    #[test]
    fn test_decode_failure_propagates() {
        let mut source = FailingSource { frames_left: 12 };
        let err = DynamicsSampler::new().sample(&mut source).unwrap_err();
        assert!(matches!(err, AnalysisError::VideoDecode { .. }));
    }
}
