use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::video_processor::{probe_duration, VideoInfo, VideoProcessor};

/// 延长音频时相邻片段的交叉淡化时长（秒）
pub const CROSSFADE_SECS: f64 = 2.0;

/// 执行 ffmpeg 命令，只输出错误信息
fn run_ffmpeg(args: &[String], what: &str) -> MediaResult<()> {
    debug!("ffmpeg {}", args.join(" "));

    let output = Command::new("ffmpeg")
        .arg("-loglevel")
        .arg("error")
        .args(args)
        .output()
        .map_err(|e| {
            MediaError::ffmpeg_failed(format!("执行 ffmpeg 命令失败 ({}): {}", what, e), None, None)
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(MediaError::ffmpeg_failed(
            format!("{}失败", what),
            Some(stderr),
            output.status.code(),
        ));
    }

    Ok(())
}

/// 读取视频的时长、分辨率、帧率和音轨信息
pub fn probe_video(video_path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    VideoProcessor::new(video_path)?.get_video_info()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// 构建合并视频与音乐的 ffmpeg 参数
///
/// - 去掉原声：只保留视频流和新音乐，按较短的流截断
/// - 保留原声：原声与新音乐混音（视频没有音轨时等同于去掉原声）
pub fn build_merge_args(
    video_path: &Path,
    audio_path: &Path,
    output_path: &Path,
    mix_original_audio: bool,
) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        path_arg(video_path),
        "-i".to_string(),
        path_arg(audio_path),
    ];

    if mix_original_audio {
        args.extend(
            [
                "-filter_complex",
                "[0:a][1:a]amix=inputs=2:duration=first[aout]",
                "-map",
                "0:v:0",
                "-map",
                "[aout]",
            ]
            .map(String::from),
        );
    } else {
        args.extend(["-map", "0:v:0", "-map", "1:a:0", "-shortest"].map(String::from));
    }

    args.extend(["-c:v", "copy", "-c:a", "aac", "-b:a", "192k", "-y"].map(String::from));
    args.push(path_arg(output_path));
    args
}

/// 把生成的音乐合并进视频
pub fn merge_audio_video(
    video_path: impl AsRef<Path>,
    audio_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    remove_original_audio: bool,
) -> MediaResult<PathBuf> {
    let video_path = video_path.as_ref();
    let output_path = output_path.as_ref();

    let mix_original_audio = if remove_original_audio {
        false
    } else {
        let has_audio = probe_video(video_path)?.has_audio;
        if !has_audio {
            warn!("⚠️  [媒体] 视频没有原声音轨，只使用生成的音乐");
        }
        has_audio
    };

    let args = build_merge_args(video_path, audio_path.as_ref(), output_path, mix_original_audio);
    run_ffmpeg(&args, "合并音视频")?;

    info!("✅ [媒体] 音视频合并完成: {}", output_path.display());
    Ok(output_path.to_path_buf())
}

/// 从视频中提取音频（先尝试 MP3，失败后重新编码为 WAV）
///
/// 返回实际写出的文件路径，扩展名可能与 `output_path` 不同。
pub fn extract_audio(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> MediaResult<PathBuf> {
    let video_path = video_path.as_ref();
    let mp3_path = output_path.as_ref().with_extension("mp3");

    let mp3_args: Vec<String> = vec![
        "-i".to_string(),
        path_arg(video_path),
        "-vn".to_string(),
        "-acodec".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-y".to_string(),
        path_arg(&mp3_path),
    ];
    match run_ffmpeg(&mp3_args, "提取音频") {
        Ok(()) => return Ok(mp3_path),
        Err(e) => warn!("⚠️  [媒体] MP3 提取失败，改用 WAV: {}", e),
    }

    let wav_path = output_path.as_ref().with_extension("wav");
    let wav_args: Vec<String> = vec![
        "-i".to_string(),
        path_arg(video_path),
        "-vn".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-y".to_string(),
        path_arg(&wav_path),
    ];
    run_ffmpeg(&wav_args, "提取音频")?;
    Ok(wav_path)
}

/// 需要拼接多少份才能在交叉淡化后达到目标时长
pub fn crossfade_copies(current_secs: f64, target_secs: f64, crossfade_secs: f64) -> usize {
    if current_secs >= target_secs {
        return 1;
    }
    let step = current_secs - crossfade_secs;
    if step <= 0.0 {
        return 1;
    }
    ((target_secs - crossfade_secs) / step).ceil().max(2.0) as usize
}

/// 构建 N 份输入依次交叉淡化的 filter_complex，返回 (filter, 输出标签)
pub fn crossfade_filter(copies: usize, crossfade_secs: f64) -> (String, String) {
    let mut parts = Vec::with_capacity(copies.saturating_sub(1));
    let mut prev = "[0:a]".to_string();
    for k in 1..copies {
        let label = format!("[x{}]", k);
        parts.push(format!(
            "{}[{}:a]acrossfade=d={}{}",
            prev, k, crossfade_secs, label
        ));
        prev = label;
    }
    (parts.join(";"), prev)
}

/// 把音频延长到目标时长（多份拷贝交叉淡化后截断），原地替换
pub fn extend_audio(audio_path: impl AsRef<Path>, target_secs: u32) -> MediaResult<()> {
    let audio_path = audio_path.as_ref();
    let target = target_secs as f64;
    let current = probe_duration(audio_path)?;

    if current >= target {
        return Ok(());
    }

    info!("🔄 [媒体] 延长音频: {:.1}s -> {}s", current, target_secs);
    let extended_path = audio_path.with_extension("extended.wav");
    let copies = crossfade_copies(current, target, CROSSFADE_SECS);

    let mut args: Vec<String> = Vec::new();
    if copies > 1 {
        for _ in 0..copies {
            args.push("-i".to_string());
            args.push(path_arg(audio_path));
        }
        let (filter, out_label) = crossfade_filter(copies, CROSSFADE_SECS);
        args.extend(["-filter_complex".to_string(), filter, "-map".to_string(), out_label]);
    } else {
        // 片段短于淡化时长，直接循环
        args.extend(["-stream_loop", "-1", "-i"].map(String::from));
        args.push(path_arg(audio_path));
    }
    args.extend([
        "-t".to_string(),
        target_secs.to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        "-y".to_string(),
        path_arg(&extended_path),
    ]);

    run_ffmpeg(&args, "延长音频")?;
    std::fs::rename(&extended_path, audio_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_args_replace_audio() {
        let args = build_merge_args(
            Path::new("in.mp4"),
            Path::new("music.wav"),
            Path::new("out.mp4"),
            false,
        );
        assert_eq!(
            args.join(" "),
            "-i in.mp4 -i music.wav -map 0:v:0 -map 1:a:0 -shortest -c:v copy -c:a aac -b:a 192k -y out.mp4"
        );
    }

    #[test]
    fn test_merge_args_mix_audio() {
        let args = build_merge_args(
            Path::new("in.mp4"),
            Path::new("music.wav"),
            Path::new("out.mp4"),
            true,
        );
        assert!(args.contains(&"[0:a][1:a]amix=inputs=2:duration=first[aout]".to_string()));
        assert!(!args.contains(&"-shortest".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_crossfade_copies() {
        // 30 秒片段延长到 45 秒：2 份 = 58 秒
        assert_eq!(crossfade_copies(30.0, 45.0, 2.0), 2);
        // 30 秒片段延长到 90 秒：(88 / 28).ceil() = 4
        assert_eq!(crossfade_copies(30.0, 90.0, 2.0), 4);
        assert_eq!(crossfade_copies(60.0, 30.0, 2.0), 1);
        assert_eq!(crossfade_copies(1.5, 30.0, 2.0), 1);
    }

    #[test]
    fn test_crossfade_filter_chain() {
        let (filter, label) = crossfade_filter(3, 2.0);
        assert_eq!(
            filter,
            "[0:a][1:a]acrossfade=d=2[x1];[x1][2:a]acrossfade=d=2[x2]"
        );
        assert_eq!(label, "[x2]");
    }
}
