use image::{DynamicImage, ImageBuffer, Luma};
use reel_music::{
    analyze_frames, build_music_prompt, MemoryFrameSource, MotionIntensity, Pace, VideoAnalysis,
};

fn flat(luma: u8) -> DynamicImage {
    DynamicImage::ImageLuma8(ImageBuffer::from_pixel(320, 240, Luma([luma])))
}

/// 第 i 个采样点（帧 5i）的亮度由 `levels[i]` 给出，其余帧沿用上一个采样点
fn frames_from_sample_levels(levels: &[u8]) -> Vec<DynamicImage> {
    let total = (levels.len() - 1) * 5 + 1;
    (0..total).map(|frame| flat(levels[frame / 5])).collect()
}

fn analyze(frames: Vec<DynamicImage>, fps: f64) -> VideoAnalysis {
    let mut source = MemoryFrameSource::new(frames, fps);
    analyze_frames(&mut source).unwrap()
}

#[test]
fn same_input_gives_same_analysis() {
    let levels = [0, 90, 10, 10, 200, 30, 31, 0];
    let first = analyze(frames_from_sample_levels(&levels), 24.0);
    let second = analyze(frames_from_sample_levels(&levels), 24.0);
    assert_eq!(first, second);
}

#[test]
fn scene_changes_are_increasing_and_spaced() {
    // 每个采样点都跳变，fps=12 时采样间隔约 0.42 秒
    let levels: Vec<u8> = (0..40).map(|i| if i % 2 == 0 { 0 } else { 120 }).collect();
    let analysis = analyze(frames_from_sample_levels(&levels), 12.0);

    assert!(!analysis.scene_changes.is_empty());
    for pair in analysis.scene_changes.windows(2) {
        assert!(pair[1] > pair[0]);
        assert!(pair[1] - pair[0] > 1.0);
    }
}

#[test]
fn reported_scene_changes_are_capped() {
    // fps=1 时采样间隔 5 秒，每次跳变都会被保留
    let levels: Vec<u8> = (0..26).map(|i| if i % 2 == 0 { 0 } else { 200 }).collect();
    let analysis = analyze(frames_from_sample_levels(&levels), 1.0);

    assert_eq!(analysis.num_scenes, 25);
    assert_eq!(analysis.scene_changes.len(), 10);
    assert_eq!(analysis.scene_changes[0], 5.0);
    assert_eq!(analysis.scene_changes[9], 50.0);
}

#[test]
fn static_video_is_slow_and_low() {
    let analysis = analyze(vec![flat(128); 11], 10.0);

    assert_eq!(analysis.overall_pace, Pace::Slow);
    assert_eq!(analysis.motion_intensity, MotionIntensity::Low);
    assert!(analysis.scene_changes.is_empty());
    assert_eq!(analysis.num_scenes, 0);
    assert_eq!(analysis.duration_seconds, 1.1);
}

#[test]
fn empty_video_is_neutral() {
    let analysis = analyze(Vec::new(), 30.0);

    assert_eq!(analysis.duration_seconds, 0.0);
    assert_eq!(analysis.overall_pace, Pace::Medium);
    assert_eq!(analysis.motion_intensity, MotionIntensity::Medium);
    assert_eq!(analysis.num_scenes, 0);
}

#[test]
fn two_cuts_with_quiet_middle() {
    // 采样帧 0/5/10/15 的亮度为 0/40/45/85，差异依次为 40, 5, 40
    let frames = frames_from_sample_levels(&[0, 40, 45, 85]);
    assert_eq!(frames.len(), 16);

    let analysis = analyze(frames, 5.0);

    assert_eq!(analysis.scene_changes, vec![1.0, 3.0]);
    assert_eq!(analysis.num_scenes, 2);
    assert_eq!(analysis.overall_pace, Pace::Fast);
    assert_eq!(analysis.motion_intensity, MotionIntensity::High);
    assert_eq!(analysis.duration_seconds, 3.2);

    let prompt = build_music_prompt(&analysis, "cinematic");
    assert!(prompt.contains("steady and consistent"));
    assert!(prompt.starts_with("cinematic instrumental music, fast tempo, energetic"));
}
