use crate::error::AppError;
use crate::expansion::ExpansionState;
use crate::gateway::{CredentialOutcome, CredentialProvider, GenerationGateway};
use crate::models::{ChatRequest, CredentialRequest, FileQuery, GenerateRequest, PathRequest};
use crate::project_store;
use crate::session::Session;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use log::{debug, info, warn};
use rust_embed::RustEmbed;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(RustEmbed)]
#[folder = "public/"]
struct Asset;

pub struct AppState {
    pub session: Mutex<Session>,
    pub gateway: Arc<dyn GenerationGateway>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub history_window: usize,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn GenerationGateway>,
        credentials: Arc<dyn CredentialProvider>,
        history_window: usize,
    ) -> Self {
        Self {
            session: Mutex::new(Session::new()),
            gateway,
            credentials,
            history_window,
        }
    }

    /// New projects open with `expansion` applied instead of fully collapsed.
    pub fn with_default_expansion(mut self, expansion: ExpansionState) -> Self {
        self.session = Mutex::new(Session::with_default_expansion(expansion));
        self
    }

    fn note_failure(&self, err: &AppError) {
        if err.is_credential() {
            self.credentials.invalidate();
        }
    }
}

fn project_view(session: &Session) -> Result<Value, AppError> {
    let project = session.project().ok_or(AppError::NoActiveProject)?;
    let collisions: Vec<String> = session
        .tree()
        .collisions()
        .iter()
        .map(ToString::to_string)
        .collect();
    Ok(json!({
        "success": true,
        "project": {
            "id": project.id,
            "name": project.name,
            "browser": project.browser,
            "createdAt": project.created_at,
            "paths": project.files.keys().collect::<Vec<_>>(),
        },
        "tree": session.tree().roots(),
        "rows": session.visible_rows(),
        "collisions": collisions,
        "selectedPath": session.selected_path(),
        "expanded": session.expansion(),
        "generating": session.is_generating(),
        "chatting": session.is_chatting(),
    }))
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "success": false, "error": message }))
}

#[get("/api/connect")]
pub async fn connect(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Connection successful",
        "credential": state.credentials.has_active_credential(),
    }))
}

#[get("/api/credential")]
pub async fn get_credential(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "active": state.credentials.has_active_credential(),
    }))
}

#[post("/api/credential")]
pub async fn set_credential(
    state: web::Data<AppState>,
    req: web::Json<CredentialRequest>,
) -> HttpResponse {
    match state.credentials.request_credential(&req.api_key) {
        CredentialOutcome::Accepted => HttpResponse::Ok().json(json!({ "success": true, "active": true })),
        CredentialOutcome::Rejected => {
            warn!("Rejected empty API key.");
            bad_request("API key is required")
        }
    }
}

#[post("/api/generate")]
pub async fn generate_project(
    state: web::Data<AppState>,
    req: web::Json<GenerateRequest>,
) -> Result<HttpResponse, AppError> {
    let GenerateRequest { prompt, browser, model } = req.into_inner();
    let prompt = prompt.trim().to_string();
    if prompt.is_empty() {
        return Ok(bad_request("Prompt is required"));
    }
    info!("Received generation request for {} using {}.", browser, model.as_str());
    let start_time = Instant::now();

    state.session.lock().await.begin_generation()?;

    // Detached: the in-flight flag must clear even if the client disconnects.
    let task_state = state.clone();
    let view = actix_web::rt::spawn(async move {
        let outcome = task_state.gateway.generate(&prompt, browser, model).await;
        if let Err(e) = &outcome {
            task_state.note_failure(e);
        }
        let mut session = task_state.session.lock().await;
        session.finish_generation(browser, outcome)?;
        let view = project_view(&session)?;
        Ok::<_, AppError>(view)
    })
    .await
    .map_err(|e| AppError::Generation(format!("generation task failed: {}", e)))??;

    info!("Generation finished in {:.2?}.", start_time.elapsed());
    Ok(HttpResponse::Ok().json(view))
}

#[post("/api/chat")]
pub async fn send_chat_message(
    state: web::Data<AppState>,
    req: web::Json<ChatRequest>,
) -> Result<HttpResponse, AppError> {
    let message = req.into_inner().message;
    if message.trim().is_empty() {
        return Ok(bad_request("Message is required"));
    }
    let ticket = state
        .session
        .lock()
        .await
        .begin_chat(&message, state.history_window)?;
    info!(
        "Received chat message for project {} ({} turns of context).",
        ticket.project_id,
        ticket.history.len()
    );
    let start_time = Instant::now();

    let task_state = state.clone();
    let response = actix_web::rt::spawn(async move {
        let outcome = task_state
            .gateway
            .chat_edit(&ticket.history, &ticket.files, ticket.browser)
            .await;
        if let Err(e) = &outcome {
            task_state.note_failure(e);
        }
        let mut session = task_state.session.lock().await;
        let chat = session.finish_chat(&ticket.project_id, outcome)?;
        let project = project_view(&session)?;
        Ok::<_, AppError>(json!({
            "success": true,
            "explanation": chat.explanation,
            "updatedPaths": chat.updated_paths,
            "project": project,
        }))
    })
    .await
    .map_err(|e| AppError::Generation(format!("chat task failed: {}", e)))??;

    info!("Chat turn finished in {:.2?}.", start_time.elapsed());
    Ok(HttpResponse::Ok().json(response))
}

#[get("/api/project")]
pub async fn get_project(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let session = state.session.lock().await;
    Ok(HttpResponse::Ok().json(project_view(&session)?))
}

#[get("/api/file")]
pub async fn get_file_content(
    state: web::Data<AppState>,
    query: web::Query<FileQuery>,
) -> Result<HttpResponse, AppError> {
    let path_str = match &query.path {
        Some(p) => p,
        None => {
            warn!("Received file content request with no path.");
            return Ok(bad_request("Path is required"));
        }
    };
    debug!("Reading file: {}", path_str);
    let session = state.session.lock().await;
    let content = session.file_content(path_str)?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "path": path_str, "content": content })))
}

#[post("/api/select")]
pub async fn select_file(
    state: web::Data<AppState>,
    req: web::Json<PathRequest>,
) -> Result<HttpResponse, AppError> {
    let mut session = state.session.lock().await;
    session.select(&req.path)?;
    Ok(HttpResponse::Ok().json(json!({ "success": true, "selectedPath": session.selected_path() })))
}

#[post("/api/tree/toggle")]
pub async fn toggle_folder(
    state: web::Data<AppState>,
    req: web::Json<PathRequest>,
) -> HttpResponse {
    let mut session = state.session.lock().await;
    let expanded = session.toggle(&req.path);
    debug!("Folder '{}' expanded: {}", req.path, expanded);
    HttpResponse::Ok().json(json!({
        "success": true,
        "path": req.path,
        "expanded": expanded,
        "rows": session.visible_rows(),
    }))
}

#[get("/api/messages")]
pub async fn get_messages(state: web::Data<AppState>) -> HttpResponse {
    let session = state.session.lock().await;
    HttpResponse::Ok().json(json!({
        "success": true,
        "messages": session.log(),
        "chatting": session.is_chatting(),
    }))
}

#[get("/api/export")]
pub async fn export_project(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let session = state.session.lock().await;
    let project = session.project().ok_or(AppError::NoActiveProject)?;
    info!("Exporting {} files from project {}.", project.files.len(), project.id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "archiveName": project_store::archive_name(project),
        "files": project_store::export_entries(project),
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(connect)
        .service(get_credential)
        .service(set_credential)
        .service(generate_project)
        .service(send_chat_message)
        .service(get_project)
        .service(get_file_content)
        .service(select_file)
        .service(toggle_folder)
        .service(get_messages)
        .service(export_project);
}

pub async fn static_handler(req: HttpRequest) -> HttpResponse {
    let path = req.path().trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };
    debug!("Serving static asset: {}", path);

    match Asset::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            HttpResponse::Ok()
                .content_type(mime.as_ref())
                .body(content.data.into_owned())
        }
        None => HttpResponse::NotFound().body("404 Not Found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::scripted::ScriptedGateway;
    use crate::gateway::{ChatUpdate, GeneratedProject, StaticCredential};
    use crate::models::FileEntry;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    fn extension() -> GeneratedProject {
        GeneratedProject {
            name: "Tab Saver".into(),
            files: vec![
                FileEntry::new("manifest.json", "{}"),
                FileEntry::new("popup/popup.html", "<html>"),
                FileEntry::new("popup/popup.js", "x"),
                FileEntry::new("background.js", "v1"),
            ],
        }
    }

    fn state(gateway: ScriptedGateway) -> web::Data<AppState> {
        web::Data::new(AppState::new(
            Arc::new(gateway),
            Arc::new(StaticCredential::new(Some("test-key".into()))),
            0,
        ))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .configure(configure)
                    .default_service(web::to(static_handler)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn generate_then_browse_tree() {
        let data = state(ScriptedGateway::default().with_generation(Ok(extension())));
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(json!({ "prompt": "save tabs", "browser": "firefox" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["project"]["browser"], "firefox");
        assert_eq!(body["selectedPath"], "manifest.json");
        assert_eq!(body["tree"][0]["type"], "folder");
        assert_eq!(body["tree"][0]["path"], "popup");
        assert_eq!(body["tree"][1]["name"], "background.js");
        assert_eq!(body["rows"].as_array().map(Vec::len), Some(3));

        let req = test::TestRequest::post()
            .uri("/api/tree/toggle")
            .set_json(json!({ "path": "popup" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["expanded"], true);
        assert_eq!(body["rows"].as_array().map(Vec::len), Some(5));

        let req = test::TestRequest::get().uri("/api/file?path=popup/popup.js").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["content"], "x");
    }

    #[actix_web::test]
    async fn generated_project_opens_with_default_expansion() {
        let data = web::Data::new(
            AppState::new(
                Arc::new(ScriptedGateway::default().with_generation(Ok(extension()))),
                Arc::new(StaticCredential::new(Some("test-key".into()))),
                0,
            )
            .with_default_expansion(ExpansionState::with_expanded(["popup"])),
        );
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(json!({ "prompt": "save tabs" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        let rows = body["rows"].as_array().expect("rows should be an array");
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0]["expanded"], true);
        assert_eq!(rows[1]["path"], "popup/popup.html");
    }

    #[actix_web::test]
    async fn chat_patches_project() {
        let data = state(
            ScriptedGateway::default()
                .with_generation(Ok(extension()))
                .with_chat(Ok(ChatUpdate {
                    explanation: "Bumped background.".into(),
                    updated_files: vec![FileEntry::new("background.js", "v2")],
                })),
        );
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(json!({ "prompt": "save tabs" }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(json!({ "message": "bump it" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["explanation"], "Bumped background.");
        assert_eq!(body["updatedPaths"], json!(["background.js"]));

        let req = test::TestRequest::get().uri("/api/export").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["archiveName"], "Tab_Saver_chrome_extension.zip");
        assert_eq!(body["files"].as_array().map(Vec::len), Some(4));
        assert_eq!(body["files"][3], json!({ "path": "background.js", "content": "v2" }));

        let req = test::TestRequest::get().uri("/api/messages").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["messages"][1], json!({ "role": "user", "content": "bump it" }));
        assert_eq!(body["messages"][2]["role"], "assistant");
    }

    #[actix_web::test]
    async fn credential_failure_flags_reconfiguration() {
        let data = state(
            ScriptedGateway::default()
                .with_generation(Err(AppError::Credential("Requested entity was not found.".into()))),
        );
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(json!({ "prompt": "block ads" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["credentialRequired"], true);

        let req = test::TestRequest::get().uri("/api/connect").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["credential"], false);

        let req = test::TestRequest::post()
            .uri("/api/credential")
            .set_json(json!({ "apiKey": "fresh" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["active"], true);
    }

    #[actix_web::test]
    async fn requests_without_project_or_input_are_rejected() {
        let data = state(ScriptedGateway::default());
        let app = app!(data);

        let req = test::TestRequest::get().uri("/api/project").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/chat")
            .set_json(json!({ "message": "hello" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(json!({ "prompt": "   " }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/file").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn serves_embedded_index() {
        let data = state(ScriptedGateway::default());
        let app = app!(data);

        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get().uri("/missing.css").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
