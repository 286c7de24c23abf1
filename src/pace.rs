use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dynamics::DynamicsSignal;

/// 场景切换去重的最小间隔（秒）
pub const MIN_SCENE_GAP_SECS: f64 = 1.0;
/// 对外暴露的场景切换时间戳上限
pub const MAX_REPORTED_SCENES: usize = 10;

/// 整体节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Slow,
    Medium,
    Fast,
}

impl Pace {
    /// 平均差异 > 25 为 fast，> 15 为 medium，其余为 slow
    pub fn from_mean(mean: f64) -> Self {
        if mean > 25.0 {
            Pace::Fast
        } else if mean > 15.0 {
            Pace::Medium
        } else {
            Pace::Slow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pace::Slow => "slow",
            Pace::Medium => "medium",
            Pace::Fast => "fast",
        }
    }
}

impl fmt::Display for Pace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运动强度，与节奏使用同一个平均值但阈值不同，两者不要求一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionIntensity {
    Low,
    Medium,
    High,
}

impl MotionIntensity {
    /// 平均差异 > 20 为 high，> 10 为 medium，其余为 low
    pub fn from_mean(mean: f64) -> Self {
        if mean > 20.0 {
            MotionIntensity::High
        } else if mean > 10.0 {
            MotionIntensity::Medium
        } else {
            MotionIntensity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionIntensity::Low => "low",
            MotionIntensity::Medium => "medium",
            MotionIntensity::High => "high",
        }
    }
}

impl fmt::Display for MotionIntensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 视频动态分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAnalysis {
    /// 视频时长（秒）
    pub duration_seconds: f64,
    /// 去重后的场景切换时间戳，最多 10 个
    pub scene_changes: Vec<f64>,
    /// 去重后的场景切换总数（截断前）
    pub num_scenes: usize,
    pub overall_pace: Pace,
    pub motion_intensity: MotionIntensity,
}

impl Default for VideoAnalysis {
    /// 零帧或帧率未知时的中性结果
    fn default() -> Self {
        Self {
            duration_seconds: 0.0,
            scene_changes: Vec::new(),
            num_scenes: 0,
            overall_pace: Pace::Medium,
            motion_intensity: MotionIntensity::Medium,
        }
    }
}

/// 贪心去重：只保留距上一个保留点超过 1 秒的时间戳
pub fn filter_scene_changes(candidates: &[f64]) -> Vec<f64> {
    let mut kept: Vec<f64> = Vec::new();
    for &timestamp in candidates {
        match kept.last() {
            Some(&last) if timestamp - last <= MIN_SCENE_GAP_SECS => {}
            _ => kept.push(timestamp),
        }
    }
    kept
}

/// 把运动信号汇总成节奏、强度和场景切换
///
/// `frame_count` 为标称帧数，为 0 时使用实际解码帧数。
pub fn classify(signal: &DynamicsSignal, frame_count: u64, fps: f64) -> VideoAnalysis {
    let frames = if frame_count > 0 {
        frame_count
    } else {
        signal.frames_decoded
    };
    let duration_seconds = if fps > 0.0 {
        frames as f64 / fps
    } else {
        0.0
    };

    let (overall_pace, motion_intensity) = match signal.mean_score() {
        Some(mean) => (Pace::from_mean(mean), MotionIntensity::from_mean(mean)),
        None => (Pace::Medium, MotionIntensity::Medium),
    };

    let mut scene_changes = filter_scene_changes(&signal.scene_candidates);
    let num_scenes = scene_changes.len();
    scene_changes.truncate(MAX_REPORTED_SCENES);

    VideoAnalysis {
        duration_seconds,
        scene_changes,
        num_scenes,
        overall_pace,
        motion_intensity,
    }
}
