use std::path::Path;

use actix_files as fs;
use actix_multipart::Multipart;
use actix_web::{web, App, HttpResponse, HttpResponseBuilder, HttpServer};
use futures::StreamExt;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::gifts::{read_requests, write_results, OutputLayout};
use crate::pipeline::Pipeline;

const MAX_UPLOAD_BYTES: usize = 1_048_576;
const DOWNLOAD_NAME: &str = "gift_riddles.csv";

/// Shared, read-only state for every request. Each request gets its own row
/// list and output buffer; nothing here is mutated.
pub struct AppState {
    pub pipeline: Pipeline,
    pub layout: OutputLayout,
    pub api_url: String,
    pub has_api_key: bool,
}

impl AppState {
    pub fn new(settings: &Settings, pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            layout: if settings.deal_lookup {
                OutputLayout::Deals
            } else {
                OutputLayout::Riddles
            },
            api_url: settings.api_url.clone(),
            has_api_key: !settings.api_key.is_empty(),
        }
    }
}

fn error_response(mut builder: HttpResponseBuilder, message: String) -> HttpResponse {
    builder.json(serde_json::json!({ "error": message }))
}

// ─── Config Endpoint ────────────────────────────────────────────────────────

async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "model": state.pipeline.model(),
        "api_url": state.api_url,
        "has_api_key": state.has_api_key,
        "deal_lookup": state.layout == OutputLayout::Deals,
        "concurrency": state.pipeline.concurrency()
    }))
}

// ─── Generate Endpoint ──────────────────────────────────────────────────────

/// Reads the `file` field of the upload; other fields are drained and ignored.
async fn read_upload(payload: &mut Multipart) -> Result<Option<Vec<u8>>, HttpResponse> {
    let mut upload = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| {
            warn!("[generate] Multipart read error: {}", e);
            error_response(
                HttpResponse::BadRequest(),
                format!("Failed to read multipart data: {}", e),
            )
        })?;
        let is_file = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .is_some_and(|name| name == "file");

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| {
                warn!("[generate] Field read error: {}", e);
                error_response(
                    HttpResponse::BadRequest(),
                    format!("Failed to read file data: {}", e),
                )
            })?;
            if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Err(error_response(
                    HttpResponse::PayloadTooLarge(),
                    format!("File too large. Maximum size is {} bytes", MAX_UPLOAD_BYTES),
                ));
            }
            data.extend_from_slice(&chunk);
        }

        if is_file && upload.is_none() {
            upload = Some(data);
        }
    }

    Ok(upload)
}

async fn generate(state: web::Data<AppState>, mut payload: Multipart) -> HttpResponse {
    let upload = match read_upload(&mut payload).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            return error_response(HttpResponse::BadRequest(), "No file provided".to_string())
        }
        Err(resp) => return resp,
    };
    info!("[generate] Received upload of {} bytes", upload.len());

    let requests = match read_requests(upload.as_slice()) {
        Ok(r) => r,
        Err(e) => {
            warn!("[generate] Unreadable CSV: {:#}", e);
            return error_response(HttpResponse::BadRequest(), format!("Invalid CSV: {:#}", e));
        }
    };

    let rows = state.pipeline.process(requests, state.layout).await;

    let mut out = Vec::new();
    if let Err(e) = write_results(&mut out, &rows, state.layout) {
        error!("[generate] Failed to build CSV: {:#}", e);
        return error_response(
            HttpResponse::InternalServerError(),
            format!("Generation failed: {:#}", e),
        );
    }
    info!("[generate] Returning {} rows", rows.len());

    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", DOWNLOAD_NAME),
        ))
        .body(out)
}

// ─── App ────────────────────────────────────────────────────────────────────

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/config", web::get().to(get_config))
        .route("/generate", web::post().to(generate));
}

pub async fn serve(settings: Settings, pipeline: Pipeline) -> std::io::Result<()> {
    let state = web::Data::new(AppState::new(&settings, pipeline));
    let static_dir = settings.static_dir.clone();
    if !Path::new(&static_dir).join("index.html").exists() {
        warn!("[server] No index.html in {}", static_dir.display());
    }

    info!("Gift riddler running at http://{}", settings.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(routes)
            .service(fs::Files::new("/", &static_dir).index_file("index.html"))
    })
    .bind(&settings.bind_addr)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FakeProvider;
    use actix_web::{http::StatusCode, test};
    use std::sync::Arc;

    const BOUNDARY: &str = "----giftriddlerboundary";

    fn state(fake: FakeProvider, deal_lookup: bool) -> web::Data<AppState> {
        let settings = Settings {
            deal_lookup,
            api_key: "k".to_string(),
            ..Settings::default()
        };
        let pipeline = Pipeline::new(Arc::new(fake), settings.model.clone())
            .with_search_tools(settings.search_tools.clone());
        web::Data::new(AppState::new(&settings, pipeline))
    }

    fn multipart_body(field: &str, content: &str) -> String {
        format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"gifts.csv\"\r\n\
             Content-Type: text/csv\r\n\
             \r\n\
             {content}\r\n\
             --{b}--\r\n",
            b = BOUNDARY,
        )
    }

    fn upload_request(field: &str, content: &str) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/generate")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(field, content))
    }

    #[actix_web::test]
    async fn test_generate_skips_incomplete_rows() {
        let app = test::init_service(
            App::new()
                .app_data(state(
                    FakeProvider::new().with_default_response("Line one\nLine two"),
                    false,
                ))
                .configure(routes),
        )
        .await;

        let csv = "Name,Gift Idea,Budget\nSam,Headphones,100\nAlex,,20\nJo,Board game,\nKim,Scarf,35";
        let resp = test::call_service(&app, upload_request("file", csv).to_request()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-disposition").unwrap(),
            "attachment; filename=\"gift_riddles.csv\""
        );
        let body = test::read_body(resp).await;
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "Name,Gift Idea,Budget,Riddle\n\
             Sam,Headphones,100,Line one | Line two\n\
             Jo,Board game,,Line one | Line two\n\
             Kim,Scarf,35,Line one | Line two\n"
        );
    }

    #[actix_web::test]
    async fn test_generate_with_deal_lookup() {
        let fake = FakeProvider::new()
            .with_response(
                "best deal",
                "```json\n{\"price\": 19.5, \"link\": \"https://s\", \"product_name\": \"Cozy Scarf\"}\n```",
            )
            .with_response("riddle", "Wrap it round");
        let app =
            test::init_service(App::new().app_data(state(fake, true)).configure(routes)).await;

        let req = upload_request("file", "Name,Gift Idea,Budget\nKim,Scarf,35\n").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = test::read_body(resp).await;
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "Name,Gift Idea,Budget,Product Found,Price,Link,Riddle\n\
             Kim,Scarf,35,Cozy Scarf,19.5,https://s,Wrap it round\n"
        );
    }

    #[actix_web::test]
    async fn test_generate_requires_file_field() {
        let app = test::init_service(
            App::new()
                .app_data(state(FakeProvider::new(), false))
                .configure(routes),
        )
        .await;

        let req = upload_request("attachment", "Name,Gift Idea\nA,B\n").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No file provided");
    }

    #[actix_web::test]
    async fn test_config_reports_settings() {
        let app = test::init_service(
            App::new()
                .app_data(state(FakeProvider::new(), true))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["model"], "openai/gpt-4o-mini");
        assert_eq!(body["has_api_key"], true);
        assert_eq!(body["deal_lookup"], true);
        assert_eq!(body["concurrency"], 1);
    }

    #[actix_web::test]
    async fn test_index_page_is_served() {
        let app = test::init_service(
            App::new()
                .app_data(state(FakeProvider::new(), false))
                .configure(routes)
                .service(fs::Files::new("/", "./static").index_file("index.html")),
        )
        .await;

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = test::read_body(resp).await;
        let html = std::str::from_utf8(&body).unwrap();
        assert!(html.contains("action=\"/generate\""));
        assert!(html.contains("name=\"file\""));
    }
}
