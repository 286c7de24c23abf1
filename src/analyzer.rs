use std::path::Path;
use std::time::Instant;
use tracing::{error, info};

use crate::dynamics::{DynamicsSampler, FrameSource};
use crate::error::AnalysisError;
use crate::pace::{classify, VideoAnalysis};
use crate::video_processor::FfmpegFrameSource;

/// 分析任意帧源的节奏、运动强度和场景切换
///
/// 帧率未知（≤ 0）时不读取帧，直接返回默认结果。
pub fn analyze_frames<S: FrameSource + ?Sized>(
    source: &mut S,
) -> Result<VideoAnalysis, AnalysisError> {
    let fps = source.fps();
    if fps <= 0.0 {
        return Ok(VideoAnalysis::default());
    }

    let signal = DynamicsSampler::new().sample(source)?;
    Ok(classify(&signal, source.frame_count(), fps))
}

/// 解码视频文件并分析其动态特征
pub fn analyze_video_dynamics(
    video_path: impl AsRef<Path>,
) -> Result<VideoAnalysis, AnalysisError> {
    let video_path = video_path.as_ref();
    let start = Instant::now();
    info!("⏳ [视频分析] 正在分析视频动态: {}", video_path.display());

    let analysis = FfmpegFrameSource::open(video_path)
        .and_then(|mut source| analyze_frames(&mut source))
        .map_err(|e| {
            error!("❌ [视频分析] 分析失败: {}", e);
            e
        })?;

    info!(
        "✅ [视频分析] 分析完成，耗时: {:.2}秒",
        start.elapsed().as_secs_f64()
    );
    info!("  • 时长: {:.2}秒", analysis.duration_seconds);
    info!("  • 节奏: {}, 运动强度: {}", analysis.overall_pace, analysis.motion_intensity);
    info!("  • 场景切换: {} 个", analysis.num_scenes);

    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::MemoryFrameSource;
    use crate::pace::{MotionIntensity, Pace};
    use image::{DynamicImage, ImageBuffer, Luma};

    fn flat(luma: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(ImageBuffer::from_pixel(320, 240, Luma([luma])))
    }

    #[test]
    fn test_zero_fps_returns_default() {
        let mut source = MemoryFrameSource::new(vec![flat(0), flat(255)], 0.0);
        let analysis = analyze_frames(&mut source).unwrap();
        assert_eq!(analysis, VideoAnalysis::default());
    }

    #[test]
    fn test_alternating_frames_are_fast() {
        // 每个采样帧都在 0 和 200 之间跳变
        let frames: Vec<DynamicImage> = (0..31)
            .map(|i| if (i / 5) % 2 == 0 { flat(0) } else { flat(200) })
            .collect();
        let mut source = MemoryFrameSource::new(frames, 10.0);
        let analysis = analyze_frames(&mut source).unwrap();

        assert_eq!(analysis.overall_pace, Pace::Fast);
        assert_eq!(analysis.motion_intensity, MotionIntensity::High);
        assert_eq!(analysis.duration_seconds, 3.1);
        // 候选在 0.5, 1.0, ... 3.0，间隔 0.5 秒，贪心去重后保留 0.5, 2.0
        assert_eq!(analysis.scene_changes, vec![0.5, 2.0]);
        assert_eq!(analysis.num_scenes, 2);
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let err = analyze_video_dynamics("/nonexistent/reel.mp4").unwrap_err();
        assert!(matches!(err, AnalysisError::VideoDecode { .. }));
    }
}
