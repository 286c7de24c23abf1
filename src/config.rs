use anyhow::Result;
use configparser::ini::Ini;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Replicate 上 MusicGen 模型的版本号
pub const DEFAULT_MODEL_VERSION: &str =
    "671ac645ce5e552cc63a54a2bbff63fcf798043055d2dac5fc9e36a837eedcfb";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// AI 音乐服务配置
#[derive(Debug, Clone)]
pub struct MusicConfig {
    /// Replicate API Token（未设置则跳过 MusicGen）
    pub replicate_api_token: Option<String>,
    pub replicate_base_url: String,
    /// MusicGen 模型版本
    pub model_version: String,
    /// Mubert PAT（未设置则跳过 Mubert）
    pub mubert_pat: Option<String>,
    pub mubert_base_url: String,
    /// 轮询 prediction 状态的间隔
    pub poll_interval: Duration,
    /// 等待 prediction 完成的最长时间
    pub max_wait: Duration,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            replicate_api_token: None,
            replicate_base_url: "https://api.replicate.com".to_string(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            mubert_pat: None,
            mubert_base_url: "https://api-b2b.mubert.com".to_string(),
            poll_interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(120),
        }
    }
}

/// 服务配置，启动时加载一次后显式传递
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP 监听地址
    pub bind: String,
    /// 上传文件临时目录
    pub upload_dir: PathBuf,
    /// 生成文件临时目录
    pub output_dir: PathBuf,
    /// 上传视频大小上限（字节）
    pub max_file_size: u64,
    /// HTTP Basic 认证密码（未设置则不启用认证）
    pub app_password: Option<String>,
    pub music: MusicConfig,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let base = env::temp_dir().join("reel-music");
        Self {
            bind: DEFAULT_BIND.to_string(),
            upload_dir: base.join("uploads"),
            output_dir: base.join("output"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            app_password: None,
            music: MusicConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 日志级别字符串转换为 tracing 级别，无法识别时使用 INFO
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level
            .parse::<tracing::Level>()
            .unwrap_or(tracing::Level::INFO)
    }
}

/// 命令行参数覆盖项
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub log_level: Option<String>,
}

/// 从单个来源读取到的配置，未设置的字段为 `None`
#[derive(Debug, Clone, Default, PartialEq)]
struct PartialConfig {
    bind: Option<String>,
    upload_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    max_file_size: Option<u64>,
    app_password: Option<String>,
    replicate_api_token: Option<String>,
    replicate_base_url: Option<String>,
    model_version: Option<String>,
    mubert_pat: Option<String>,
    mubert_base_url: Option<String>,
    poll_interval_secs: Option<u64>,
    max_wait_secs: Option<u64>,
    log_level: Option<String>,
}

impl PartialConfig {
    /// 字段级合并，`self` 优先
    fn or(self, lower: PartialConfig) -> PartialConfig {
        PartialConfig {
            bind: self.bind.or(lower.bind),
            upload_dir: self.upload_dir.or(lower.upload_dir),
            output_dir: self.output_dir.or(lower.output_dir),
            max_file_size: self.max_file_size.or(lower.max_file_size),
            app_password: self.app_password.or(lower.app_password),
            replicate_api_token: self.replicate_api_token.or(lower.replicate_api_token),
            replicate_base_url: self.replicate_base_url.or(lower.replicate_base_url),
            model_version: self.model_version.or(lower.model_version),
            mubert_pat: self.mubert_pat.or(lower.mubert_pat),
            mubert_base_url: self.mubert_base_url.or(lower.mubert_base_url),
            poll_interval_secs: self.poll_interval_secs.or(lower.poll_interval_secs),
            max_wait_secs: self.max_wait_secs.or(lower.max_wait_secs),
            log_level: self.log_level.or(lower.log_level),
        }
    }

    fn into_config(self) -> AppConfig {
        let defaults = AppConfig::default();
        let music_defaults = defaults.music;
        AppConfig {
            bind: self.bind.unwrap_or(defaults.bind),
            upload_dir: self.upload_dir.unwrap_or(defaults.upload_dir),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            max_file_size: self.max_file_size.unwrap_or(defaults.max_file_size),
            app_password: self.app_password,
            music: MusicConfig {
                replicate_api_token: self.replicate_api_token,
                replicate_base_url: self
                    .replicate_base_url
                    .unwrap_or(music_defaults.replicate_base_url),
                model_version: self.model_version.unwrap_or(music_defaults.model_version),
                mubert_pat: self.mubert_pat,
                mubert_base_url: self.mubert_base_url.unwrap_or(music_defaults.mubert_base_url),
                poll_interval: self
                    .poll_interval_secs
                    .map(|secs| Duration::from_secs(secs.max(1)))
                    .unwrap_or(music_defaults.poll_interval),
                max_wait: self
                    .max_wait_secs
                    .map(Duration::from_secs)
                    .unwrap_or(music_defaults.max_wait),
            },
            log_level: self.log_level.unwrap_or(defaults.log_level),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(
        config_file: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<AppConfig> {
        // 1. 先加载配置文件（如果存在）
        let file_config = match config_file {
            Some(config_path) => Self::load_from_file(config_path)
                .map_err(|e| warn!("⚠️  [配置] {}，忽略配置文件", e))
                .ok(),
            None => Self::load_from_default_locations().ok(),
        };

        // 2. 加载环境变量
        let env_config = Self::load_from_env();

        // 3. 合并配置
        Ok(Self::merge(overrides, env_config, file_config.unwrap_or_default()))
    }

    fn merge(
        overrides: ConfigOverrides,
        env_config: PartialConfig,
        file_config: PartialConfig,
    ) -> AppConfig {
        let cli_config = PartialConfig {
            bind: overrides.bind,
            log_level: overrides.log_level,
            ..Default::default()
        };
        cli_config.or(env_config).or(file_config).into_config()
    }

    /// 从环境变量加载配置
    fn load_from_env() -> PartialConfig {
        let var = |key: &str| non_empty(env::var(key).ok());

        PartialConfig {
            bind: var("REEL_MUSIC_BIND")
                .or_else(|| var("PORT").map(|port| format!("0.0.0.0:{}", port))),
            upload_dir: var("REEL_MUSIC_UPLOAD_DIR").map(PathBuf::from),
            output_dir: var("REEL_MUSIC_OUTPUT_DIR").map(PathBuf::from),
            max_file_size: var("REEL_MUSIC_MAX_FILE_SIZE").and_then(|v| v.parse().ok()),
            app_password: var("APP_PASSWORD"),
            replicate_api_token: var("REPLICATE_API_TOKEN"),
            replicate_base_url: var("REPLICATE_BASE_URL"),
            model_version: None,
            mubert_pat: var("MUBERT_LICENSE"),
            mubert_base_url: var("MUBERT_BASE_URL"),
            poll_interval_secs: None,
            max_wait_secs: None,
            log_level: var("LOG_LEVEL"),
        }
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<PartialConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut config_parser = Ini::new();
        config_parser
            .load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(Self::from_ini(&config_parser))
    }

    /// 先读指定节，没有则读 [DEFAULT] 节
    fn from_ini(ini: &Ini) -> PartialConfig {
        let get = |section: &str, key: &str| {
            non_empty(ini.get(section, key).or_else(|| ini.get("DEFAULT", key)))
        };

        PartialConfig {
            bind: get("service", "bind"),
            upload_dir: get("service", "upload_dir").map(PathBuf::from),
            output_dir: get("service", "output_dir").map(PathBuf::from),
            max_file_size: get("service", "max_file_size").and_then(|v| v.parse().ok()),
            app_password: get("service", "app_password"),
            replicate_api_token: get("music", "replicate_api_token"),
            replicate_base_url: get("music", "replicate_base_url"),
            model_version: get("music", "model_version"),
            mubert_pat: get("music", "mubert_pat"),
            mubert_base_url: get("music", "mubert_base_url"),
            poll_interval_secs: get("music", "poll_interval_secs").and_then(|v| v.parse().ok()),
            max_wait_secs: get("music", "max_wait_secs").and_then(|v| v.parse().ok()),
            log_level: get("logging", "level"),
        }
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<PartialConfig> {
        // 1. 当前目录的 reel-music.ini
        let current_dir_config = PathBuf::from("reel-music.ini");
        if current_dir_config.exists() {
            return Self::load_from_file(&current_dir_config);
        }

        // 2. 当前目录的 .reel-music.ini
        let hidden_config = PathBuf::from(".reel-music.ini");
        if hidden_config.exists() {
            return Self::load_from_file(&hidden_config);
        }

        // 3. 用户主目录的 .reel-music.ini
        if let Some(home) = env::var_os("HOME") {
            let home_config = PathBuf::from(home).join(".reel-music.ini");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        // 4. /etc/reel-music.ini (Linux/macOS)
        let etc_config = PathBuf::from("/etc/reel-music.ini");
        if etc_config.exists() {
            return Self::load_from_file(&etc_config);
        }

        Err(anyhow::anyhow!("未找到配置文件"))
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = AppConfig::default();
        let mut config_parser = Ini::new();
        config_parser.set("service", "bind", Some(defaults.bind));
        config_parser.set("service", "upload_dir", Some(defaults.upload_dir.display().to_string()));
        config_parser.set("service", "output_dir", Some(defaults.output_dir.display().to_string()));
        config_parser.set("service", "max_file_size", Some(defaults.max_file_size.to_string()));
        config_parser.set("service", "app_password", Some(String::new()));
        config_parser.set("music", "replicate_api_token", Some(String::new()));
        config_parser.set("music", "replicate_base_url", Some(defaults.music.replicate_base_url));
        config_parser.set("music", "model_version", Some(defaults.music.model_version));
        config_parser.set("music", "mubert_pat", Some(String::new()));
        config_parser.set("music", "mubert_base_url", Some(defaults.music.mubert_base_url));
        config_parser.set(
            "music",
            "poll_interval_secs",
            Some(defaults.music.poll_interval.as_secs().to_string()),
        );
        config_parser.set(
            "music",
            "max_wait_secs",
            Some(defaults.music.max_wait.as_secs().to_string()),
        );
        config_parser.set("logging", "level", Some(defaults.log_level));

        config_parser
            .write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConfigLoader::merge(
            ConfigOverrides::default(),
            PartialConfig::default(),
            PartialConfig::default(),
        );
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
        assert!(config.app_password.is_none());
        assert_eq!(config.music.poll_interval, Duration::from_secs(3));
        assert_eq!(config.music.max_wait, Duration::from_secs(120));
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_priority_cli_env_file() {
        let file = PartialConfig {
            bind: Some("127.0.0.1:1000".to_string()),
            log_level: Some("warn".to_string()),
            app_password: Some("from-file".to_string()),
            max_file_size: Some(10),
            ..Default::default()
        };
        let env_config = PartialConfig {
            bind: Some("127.0.0.1:2000".to_string()),
            app_password: Some("from-env".to_string()),
            ..Default::default()
        };
        let overrides = ConfigOverrides {
            bind: Some("127.0.0.1:3000".to_string()),
            log_level: None,
        };

        let config = ConfigLoader::merge(overrides, env_config, file);
        assert_eq!(config.bind, "127.0.0.1:3000");
        assert_eq!(config.app_password.as_deref(), Some("from-env"));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.tracing_level(), tracing::Level::WARN);
        assert_eq!(config.max_file_size, 10);
    }

    #[test]
    fn test_ini_sections_and_default_fallback() {
        let mut ini = Ini::new();
        ini.read(
            "[DEFAULT]\nmubert_pat = pat-123\n\n[service]\nbind = 127.0.0.1:9000\napp_password =\n\n[music]\nreplicate_api_token = r8_token\npoll_interval_secs = 1\n\n[logging]\nlevel = debug\n"
                .to_string(),
        )
        .unwrap();

        let partial = ConfigLoader::from_ini(&ini);
        assert_eq!(partial.bind.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(partial.app_password, None);
        assert_eq!(partial.replicate_api_token.as_deref(), Some("r8_token"));
        assert_eq!(partial.mubert_pat.as_deref(), Some("pat-123"));
        assert_eq!(partial.poll_interval_secs, Some(1));
        assert_eq!(partial.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_default_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reel-music.ini");
        ConfigLoader::create_default_config(&path).unwrap();

        let partial = ConfigLoader::load_from_file(&path).unwrap();
        let config = partial.into_config();
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.music.model_version, DEFAULT_MODEL_VERSION);
        assert!(config.music.replicate_api_token.is_none());
        assert!(config.app_password.is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(ConfigLoader::load_from_file(Path::new("/nonexistent/reel-music.ini")).is_err());
    }
}
