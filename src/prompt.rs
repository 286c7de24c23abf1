use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::pace::{MotionIntensity, Pace, VideoAnalysis};

fn tempo_phrase(pace: Pace) -> &'static str {
    match pace {
        Pace::Slow => "slow tempo, calm",
        Pace::Medium => "moderate tempo",
        Pace::Fast => "fast tempo, energetic",
    }
}

fn intensity_phrase(intensity: MotionIntensity) -> &'static str {
    match intensity {
        MotionIntensity::Low => "gentle, subtle",
        MotionIntensity::Medium => "balanced, moderate energy",
        MotionIntensity::High => "intense, powerful",
    }
}

/// 结构描述基于截断前的场景数
fn structure_phrase(num_scenes: usize) -> &'static str {
    if num_scenes > 5 {
        "dynamic with build-ups and transitions"
    } else if num_scenes > 2 {
        "with some variation and progression"
    } else {
        "steady and consistent"
    }
}

/// 根据视频分析结果和风格生成音乐提示词
///
/// `style` 在这一层不做校验。
pub fn build_music_prompt(analysis: &VideoAnalysis, style: &str) -> String {
    format!(
        "{} instrumental music, {}, {}, {}, professional production, no vocals, cinematic",
        style,
        tempo_phrase(analysis.overall_pace),
        intensity_phrase(analysis.motion_intensity),
        structure_phrase(analysis.num_scenes),
    )
}

/// 支持的音乐风格
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MusicStyle {
    Energetic,
    Epic,
    #[default]
    Ambient,
    Happy,
    Chill,
    Dramatic,
    Upbeat,
    Inspiring,
    Cinematic,
    Electronic,
    HipHop,
    Lofi,
    Rock,
}

impl MusicStyle {
    pub const ALL: [MusicStyle; 13] = [
        MusicStyle::Energetic,
        MusicStyle::Epic,
        MusicStyle::Ambient,
        MusicStyle::Happy,
        MusicStyle::Chill,
        MusicStyle::Dramatic,
        MusicStyle::Upbeat,
        MusicStyle::Inspiring,
        MusicStyle::Cinematic,
        MusicStyle::Electronic,
        MusicStyle::HipHop,
        MusicStyle::Lofi,
        MusicStyle::Rock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MusicStyle::Energetic => "energetic",
            MusicStyle::Epic => "epic",
            MusicStyle::Ambient => "ambient",
            MusicStyle::Happy => "happy",
            MusicStyle::Chill => "chill",
            MusicStyle::Dramatic => "dramatic",
            MusicStyle::Upbeat => "upbeat",
            MusicStyle::Inspiring => "inspiring",
            MusicStyle::Cinematic => "cinematic",
            MusicStyle::Electronic => "electronic",
            MusicStyle::HipHop => "hip-hop",
            MusicStyle::Lofi => "lofi",
            MusicStyle::Rock => "rock",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.as_str()).collect()
    }
}

impl fmt::Display for MusicStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MusicStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "不支持的音乐风格: {}，可选: {}",
                    s,
                    Self::names().join(", ")
                )
            })
    }
}

/// 没有视频分析提示词时使用的风格默认提示词
pub fn style_fallback_prompt(style: &str) -> String {
    let prompt = match style {
        "energetic" => "upbeat electronic dance music, driving beat, energetic synths, modern EDM production, festival vibes, high energy, 128 BPM",
        "epic" => "epic cinematic orchestral music, powerful dramatic strings, heroic brass section, thundering percussion, movie trailer style, inspiring and grandiose",
        "ambient" => "ambient atmospheric soundscape, ethereal pads, gentle piano, calming textures, meditation music, peaceful and serene, floating melodies",
        "happy" => "happy upbeat pop music, bright cheerful melody, acoustic guitars, clapping rhythm, feel-good vibes, sunny and optimistic, major key",
        "chill" => "chill lofi hip hop beat, jazzy chords, vinyl crackle, mellow drums, lazy sunday afternoon, relaxed and smooth, 85 BPM",
        "dramatic" => "dark dramatic music, intense strings, ominous bass, suspenseful atmosphere, thriller soundtrack, minor key, building tension",
        "upbeat" => "upbeat dance pop, catchy melody, four on the floor beat, disco vibes, party anthem, energetic and fun, radio ready",
        "inspiring" => "inspiring motivational music, uplifting piano, soaring strings, hopeful melody, achievement and success, emotional build up, major key",
        "cinematic" => "cinematic film score, sweeping orchestra, emotional strings, grand piano, movie soundtrack, epic and beautiful, professional production",
        "electronic" => "modern electronic music, pulsing synth bass, digital drums, futuristic sound design, club banger, energetic drops, progressive house",
        "hip-hop" => "hip hop instrumental beat, 808 bass, trap drums, rolling hi hats, dark melody, modern rap beat, hard hitting, 140 BPM",
        "lofi" => "lofi beats to study to, jazzy samples, dusty drums, warm vinyl sound, relaxing hip hop, chill vibes, perfect loop, 70 BPM",
        "rock" => "energetic rock music, electric guitars, driving bass, powerful drums, anthemic chorus, stadium rock energy, distorted guitars",
        other => {
            return format!(
                "{} instrumental music, professional production, no vocals, modern high quality",
                other
            )
        }
    };
    prompt.to_string()
}
