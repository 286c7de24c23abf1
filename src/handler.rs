use axum::{
    extract::{DefaultBodyLimit, Multipart, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json as ResponseJson, Response},
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD as base64_engine;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Serialize;
use sha1::Sha1;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::GenerationError;
use crate::music_generator::MusicGenerator;
use crate::processor::{
    is_video_file, process_reel as run_pipeline, JobWorkspace, OutputFormat, ReelJob,
    ALLOWED_VIDEO_EXTENSIONS,
};
use crate::prompt::MusicStyle;

type HandlerResult<T> = Result<T, (StatusCode, String)>;
type HmacSha1 = Hmac<Sha1>;

/// 所有 handler 共享的状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub generator: Arc<MusicGenerator>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let generator = MusicGenerator::new(config.music.clone());
        Self {
            config: Arc::new(config),
            generator: Arc::new(generator),
        }
    }
}

/// 构建 HTTP 路由
pub fn router(state: AppState) -> Router {
    // 视频和参考素材各自受大小限制，留出表单字段的余量
    let body_limit = (state.config.max_file_size as usize)
        .saturating_mul(2)
        .saturating_add(1024 * 1024);

    let process_route = post(process_reel)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_password));

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/styles", get(list_styles))
        .route("/info", get(service_info))
        .route("/process-reel", process_route)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub version: &'static str,
}

/// 健康检查 Handler
pub async fn health_check() -> ResponseJson<HealthResponse> {
    ResponseJson(HealthResponse {
        status: "ok",
        message: "Reel Music 服务运行中",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct StylesResponse {
    pub styles: Vec<&'static str>,
    pub description: &'static str,
}

pub async fn list_styles() -> ResponseJson<StylesResponse> {
    ResponseJson(StylesResponse {
        styles: MusicStyle::names(),
        description: "选择与视频情绪相符的音乐风格",
    })
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub name: &'static str,
    pub description: &'static str,
    pub features: Vec<&'static str>,
    pub supported_formats: Vec<&'static str>,
    pub max_file_size_mb: f64,
    pub music_styles: Vec<&'static str>,
}

pub async fn service_info(State(state): State<AppState>) -> ResponseJson<InfoResponse> {
    ResponseJson(InfoResponse {
        name: "Reel Music",
        description: "上传短视频，返回配好 AI 生成的免版税音乐的视频",
        features: vec![
            "AI 生成纯音乐",
            "免版税，可商用",
            "多种音乐风格",
            "根据视频节奏和场景切换生成提示词",
            "自动音视频同步",
        ],
        supported_formats: ALLOWED_VIDEO_EXTENSIONS.to_vec(),
        max_file_size_mb: state.config.max_file_size as f64 / (1024.0 * 1024.0),
        music_styles: MusicStyle::names(),
    })
}

/// 以 HMAC-SHA1 标签做常数时间比较
fn credentials_match(expected: &str, provided: &str) -> bool {
    const KEY: &[u8] = b"reel-music-basic-auth";

    let Ok(mut mac) = HmacSha1::new_from_slice(KEY) else {
        return false;
    };
    mac.update(expected.as_bytes());
    let expected_tag = mac.finalize().into_bytes();

    let Ok(mut mac) = HmacSha1::new_from_slice(KEY) else {
        return false;
    };
    mac.update(provided.as_bytes());
    mac.verify_slice(&expected_tag).is_ok()
}

/// 从 `Authorization: Basic ...` 中取出密码部分
fn basic_auth_password(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64_engine.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (_, password) = decoded.split_once(':')?;
    Some(password.to_string())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic")],
        "密码错误",
    )
        .into_response()
}

/// 配置了密码时要求 HTTP Basic 认证（用户名不校验）
pub async fn require_password(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.app_password.as_deref() else {
        return next.run(request).await;
    };

    match basic_auth_password(request.headers()) {
        Some(provided) if credentials_match(expected, &provided) => next.run(request).await,
        _ => {
            warn!("认证失败: {}", request.uri());
            unauthorized()
        }
    }
}

/// 上传的文件字段
struct UploadedFile {
    filename: String,
    bytes: axum::body::Bytes,
}

/// `/process-reel` 的表单内容
#[derive(Default)]
struct ReelForm {
    video: Option<UploadedFile>,
    reference: Option<UploadedFile>,
    style: Option<String>,
    remove_original_audio: Option<String>,
    output_format: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> HandlerResult<ReelForm> {
    let mut form = ReelForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" | "reference_audio" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| (e.status(), e.body_text()))?;
                // 浏览器对未选择的可选文件会发送空字段
                if filename.is_empty() && bytes.is_empty() {
                    continue;
                }
                let file = UploadedFile { filename, bytes };
                if name == "video" {
                    form.video = Some(file);
                } else {
                    form.reference = Some(file);
                }
            }
            "style" | "remove_original_audio" | "output_format" => {
                let text = field.text().await.map_err(|e| (e.status(), e.body_text()))?;
                let slot = match name.as_str() {
                    "style" => &mut form.style,
                    "remove_original_audio" => &mut form.remove_original_audio,
                    _ => &mut form.output_format,
                };
                *slot = Some(text);
            }
            other => warn!("忽略未知表单字段: {}", other),
        }
    }

    Ok(form)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn upload_name(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
}

/// `attachment` 头，非 ASCII 文件名用 RFC 5987 编码
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(filename, NON_ALPHANUMERIC)
    )
}

/// 上传视频，返回配好 AI 音乐的视频、音乐或 ZIP 包
pub async fn process_reel(
    State(state): State<AppState>,
    multipart: Multipart,
) -> HandlerResult<Response> {
    let form = read_form(multipart).await?;

    let video = form
        .video
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "缺少 video 文件".to_string()))?;
    if !is_video_file(&video.filename) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "不支持的文件类型，支持: {}",
                ALLOWED_VIDEO_EXTENSIONS.join(", ")
            ),
        ));
    }
    if video.bytes.len() as u64 > state.config.max_file_size {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "文件过大，最大 {:.0}MB",
                state.config.max_file_size as f64 / (1024.0 * 1024.0)
            ),
        ));
    }

    let style: MusicStyle = form
        .style
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?
        .unwrap_or_default();
    let remove_original_audio = match form.remove_original_audio.as_deref() {
        None => true,
        Some(value) => parse_bool(value).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("remove_original_audio 不是有效的布尔值: {}", value),
            )
        })?,
    };
    let output_format: OutputFormat = form
        .output_format
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?
        .unwrap_or_default();

    let internal = |what: &str, e: &dyn std::fmt::Display| {
        error!("{}: {}", what, e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {}", what, e))
    };

    let mut workspace =
        JobWorkspace::new(&state.config).map_err(|e| internal("创建临时目录失败", &e))?;
    info!(
        "收到处理请求 [任务 {}]: 文件={}, 风格={}, 格式={}",
        workspace.job_id(),
        video.filename,
        style,
        output_format
    );

    let video_name = upload_name(&video.filename).to_string();
    let video_path = workspace.upload_path(&video_name);
    tokio::fs::write(&video_path, &video.bytes)
        .await
        .map_err(|e| internal("保存上传文件失败", &e))?;

    let reference_path: Option<PathBuf> = match &form.reference {
        Some(reference) => {
            let name = format!("reference_{}", upload_name(&reference.filename));
            let path = workspace.upload_path(&name);
            tokio::fs::write(&path, &reference.bytes)
                .await
                .map_err(|e| internal("保存参考素材失败", &e))?;
            Some(path)
        }
        None => None,
    };

    let job = ReelJob {
        video_path,
        original_filename: video_name,
        style: style.to_string(),
        remove_original_audio,
        reference_path,
        output_format,
    };

    let output = run_pipeline(&job, &mut workspace, &state.generator)
        .await
        .map_err(|e| {
            if e.downcast_ref::<GenerationError>().is_some() {
                internal("音乐生成失败", &e)
            } else {
                internal("处理失败", &format!("{:#}", e))
            }
        })?;

    // 读入内存后 workspace 才能清理临时文件
    let body = tokio::fs::read(&output.artifact.path)
        .await
        .map_err(|e| internal("读取结果文件失败", &e))?;
    drop(workspace);

    Ok((
        [
            (header::CONTENT_TYPE, output.artifact.media_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&output.artifact.filename),
            ),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    const BOUNDARY: &str = "reel-music-boundary";

    fn test_state(password: Option<&str>) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("output"),
            app_password: password.map(str::to_string),
            ..AppConfig::default()
        };
        (AppState::new(config), dir)
    }

    fn basic(password: &str) -> String {
        let token = base64_engine.encode(format!("user:{}", password));
        format!("Basic {}", token)
    }

    fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> String {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!("--{}\r\n", BOUNDARY));
            match filename {
                Some(f) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    name, f
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    name
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));
        body
    }

    fn upload_request(auth: Option<String>, body: String) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method("POST")
            .uri("/process-reel")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_credentials_match() {
        assert!(credentials_match("secret", "secret"));
        assert!(!credentials_match("secret", "Secret"));
        assert!(!credentials_match("secret", ""));
    }

    #[test]
    fn test_basic_auth_password() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, basic("pa:ss").parse().unwrap());
        assert_eq!(basic_auth_password(&headers).as_deref(), Some("pa:ss"));

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(basic_auth_password(&headers), None);
    }

    #[test]
    fn test_content_disposition_encodes_non_ascii() {
        let value = content_disposition("reel_with_music_海边.mp4");
        assert!(value.starts_with("attachment; filename=\"reel_with_music___.mp4\""));
        assert!(value.contains("filename*=UTF-8''reel%5Fwith%5Fmusic%5F%E6%B5%B7"));
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state(None);
        let response = router(state)
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_styles_lists_all() {
        let (state, _dir) = test_state(None);
        let response = router(state)
            .oneshot(HttpRequest::builder().uri("/styles").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["styles"].as_array().unwrap().len(), 13);
    }

    #[tokio::test]
    async fn test_process_requires_password() {
        let (state, _dir) = test_state(Some("secret"));
        let body = multipart_body(&[("video", Some("clip.mp4"), "abc")]);

        let response = router(state.clone())
            .oneshot(upload_request(None, body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic");

        let response = router(state)
            .oneshot(upload_request(Some(basic("wrong")), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_process_rejects_bad_extension() {
        let (state, _dir) = test_state(Some("secret"));
        let body = multipart_body(&[("video", Some("notes.txt"), "abc")]);

        let response = router(state)
            .oneshot(upload_request(Some(basic("secret")), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains(".mp4"));
    }

    #[tokio::test]
    async fn test_process_rejects_unknown_style() {
        let (state, _dir) = test_state(None);
        let body = multipart_body(&[
            ("video", Some("clip.mp4"), "abc"),
            ("style", None, "polka"),
        ]);

        let response = router(state)
            .oneshot(upload_request(None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_process_rejects_oversized_video() {
        let (mut state, _dir) = test_state(None);
        let mut config = (*state.config).clone();
        config.max_file_size = 2;
        state.config = Arc::new(config);
        let body = multipart_body(&[("video", Some("clip.mp4"), "abcdef")]);

        let response = router(state)
            .oneshot(upload_request(None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
