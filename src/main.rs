use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reel_music::{
    analyze_video_dynamics, build_music_prompt,
    config::{AppConfig, ConfigLoader, ConfigOverrides},
    handler::{self, AppState},
    processor::{is_video_file, process_reel, JobWorkspace, OutputFormat, ReelJob},
    video_processor::init_ffmpeg,
    MusicGenerator, MusicStyle,
};
use std::path::PathBuf;

/// 短视频配乐工具 - 分析视频节奏，生成匹配的 AI 音乐并合成
#[derive(Parser, Debug)]
#[command(name = "reel-music")]
#[command(about = "短视频配乐工具：分析节奏与场景切换、生成 AI 音乐、合成视频", long_about = None)]
struct Args {
    /// 日志级别（trace, debug, info, warn, error）
    /// 可通过环境变量 LOG_LEVEL 或配置文件设置
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// CLI 模式：为本地视频配乐
    Process {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 音乐风格
        #[arg(short, long, default_value = "ambient")]
        style: MusicStyle,

        /// 输出目录
        #[arg(short, long, default_value = "./output")]
        output_dir: PathBuf,

        /// 参考音频或带音乐的视频（可选）
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// 保留原声并与生成的音乐混音
        #[arg(long)]
        keep_original_audio: bool,

        /// 输出格式
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Video)]
        format: OutputFormat,

        /// 配置文件路径（可选，支持 .ini 格式）
        /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 只分析视频，输出分析结果和音乐提示词
    Analyze {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: PathBuf,

        /// 用于生成提示词的音乐风格
        #[arg(short, long, default_value = "ambient")]
        style: MusicStyle,
    },
    /// Web 服务模式：启动 HTTP 服务器
    Serve {
        /// 监听地址（默认从环境变量 REEL_MUSIC_BIND / PORT 读取，否则使用 0.0.0.0:8000）
        #[arg(short, long)]
        bind: Option<String>,

        /// 配置文件路径
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件路径
        path: PathBuf,
    },
}

fn init_logging(config: &AppConfig) {
    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = args.log_level;

    match args.command {
        Commands::Process {
            input,
            style,
            output_dir,
            reference,
            keep_original_audio,
            format,
            config: config_file,
        } => {
            let overrides = ConfigOverrides {
                log_level,
                ..Default::default()
            };
            let config = ConfigLoader::load_config(config_file.as_deref(), overrides)
                .context("加载配置失败")?;
            init_logging(&config);
            init_ffmpeg().context("初始化 FFmpeg 失败")?;

            run_process(
                config,
                input,
                style,
                output_dir,
                reference,
                keep_original_audio,
                format,
            )
            .await?;
        }
        Commands::Analyze { input, style } => {
            let overrides = ConfigOverrides {
                log_level,
                ..Default::default()
            };
            let config = ConfigLoader::load_config(None, overrides).context("加载配置失败")?;
            init_logging(&config);
            init_ffmpeg().context("初始化 FFmpeg 失败")?;

            let analysis = analyze_video_dynamics(&input).context("分析视频失败")?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            println!("提示词: {}", build_music_prompt(&analysis, style.as_str()));
        }
        Commands::Serve { bind, config: config_file } => {
            let overrides = ConfigOverrides { bind, log_level };
            let config = ConfigLoader::load_config(config_file.as_deref(), overrides)
                .context("加载配置失败")?;
            init_logging(&config);
            init_ffmpeg().context("初始化 FFmpeg 失败")?;

            start_web_server(config).await?;
        }
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(&path).context("创建配置文件失败")?;
            println!("已生成配置文件: {}", path.display());
        }
    }

    Ok(())
}

async fn run_process(
    config: AppConfig,
    input: PathBuf,
    style: MusicStyle,
    output_dir: PathBuf,
    reference: Option<PathBuf>,
    keep_original_audio: bool,
    format: OutputFormat,
) -> Result<()> {
    if !input.exists() {
        bail!("视频文件不存在: {}", input.display());
    }
    let original_filename = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("reel.mp4")
        .to_string();
    if !is_video_file(&original_filename) {
        bail!("不支持的视频格式: {}", original_filename);
    }
    if let Some(reference) = &reference {
        if !reference.exists() {
            bail!("参考文件不存在: {}", reference.display());
        }
    }

    let generator = MusicGenerator::new(config.music.clone());
    let mut workspace = JobWorkspace::new(&config).context("创建临时目录失败")?;
    let job = ReelJob {
        video_path: input,
        original_filename,
        style: style.to_string(),
        remove_original_audio: !keep_original_audio,
        reference_path: reference,
        output_format: format,
    };

    let output = process_reel(&job, &mut workspace, &generator)
        .await
        .context("处理视频失败")?;

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("创建输出目录失败: {}", output_dir.display()))?;
    let target = output_dir.join(&output.artifact.filename);
    std::fs::copy(&output.artifact.path, &target)
        .with_context(|| format!("写入输出文件失败: {}", target.display()))?;

    println!(
        "节奏: {}, 运动强度: {}, 场景切换: {} 个",
        output.analysis.overall_pace, output.analysis.motion_intensity, output.analysis.num_scenes
    );
    println!("提示词: {}", output.prompt);
    println!("输出文件: {}", target.display());
    Ok(())
}

async fn start_web_server(config: AppConfig) -> Result<()> {
    let bind = config.bind.clone();
    if config.app_password.is_none() {
        tracing::warn!("⚠️  未设置 APP_PASSWORD，/process-reel 不需要认证");
    }
    if config.music.replicate_api_token.is_none() && config.music.mubert_pat.is_none() {
        tracing::warn!("⚠️  未配置 REPLICATE_API_TOKEN 或 MUBERT_LICENSE，音乐生成将失败");
    }

    let app = handler::router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/health", bind);
    tracing::info!("  • 音乐风格: GET  http://{}/styles", bind);
    tracing::info!("  • 服务信息: GET  http://{}/info", bind);
    tracing::info!("  • 视频配乐: POST http://{}/process-reel", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}
