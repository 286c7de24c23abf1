pub mod error;
pub mod dynamics;
pub mod pace;
pub mod prompt;
pub mod video_processor;
pub mod analyzer;
pub mod media;
pub mod music_generator;
pub mod processor;
pub mod handler;
pub mod config;

pub use error::{AnalysisError, GenerationError, MediaError};
pub use dynamics::{DynamicsSampler, FrameSource, MemoryFrameSource, VideoDynamicsSample};
pub use pace::{MotionIntensity, Pace, VideoAnalysis};
pub use prompt::{build_music_prompt, MusicStyle};
pub use video_processor::{FfmpegFrameSource, VideoInfo, VideoProcessor};
pub use analyzer::{analyze_frames, analyze_video_dynamics};
pub use music_generator::{MusicGenerator, MusicRequest};
pub use processor::{process_reel, JobWorkspace, OutputFormat, ReelJob, ReelOutput};
pub use config::{AppConfig, ConfigLoader, ConfigOverrides};
