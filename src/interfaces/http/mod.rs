pub mod state;

use crate::application::use_cases::query_pipeline::QueryAnswer;
use crate::domain::dataset::DatasetInput;
use crate::domain::error::AppError;
use crate::domain::operation::StructuredOperation;
use crate::domain::profile::ColumnKind;
use crate::domain::value::Value;
use crate::infrastructure::config::ServerConfig;
use crate::infrastructure::csv::CsvParser;
use actix_cors::Cors;
use actix_web::{
    delete, dev::Server, get, http::StatusCode, post, put, web, App, HttpResponse, HttpServer,
    Responder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

pub use state::{HttpState, SessionStore};

#[derive(Debug, Deserialize, Validate)]
pub struct DatasetRequest {
    #[validate(length(min = 1, max = 1024))]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub declared_kinds: HashMap<String, ColumnKind>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,
    /// Run the primary right away when the parse is confident
    #[serde(default)]
    pub auto_execute: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExecuteRequest {
    #[validate(length(max = 1000))]
    pub query: String,
    pub operation: StructuredOperation,
    /// Fingerprint from the parse result the operation came from
    #[serde(default)]
    pub dataset_fingerprint: Option<String>,
}

#[derive(Serialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn status_for(e: &AppError) -> StatusCode {
    match e {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::ValidationError(_)
        | AppError::ParseError(_)
        | AppError::InvalidOperation(_)
        | AppError::TypeMismatch(_)
        | AppError::UnresolvableColumn(_) => StatusCode::BAD_REQUEST,
        AppError::StaleOperation(_) => StatusCode::CONFLICT,
        AppError::ParseTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AppError::LLMError(_) => StatusCode::BAD_GATEWAY,
        AppError::SecurityError(_) | AppError::IoError(_) | AppError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn fail(e: AppError) -> HttpResponse {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(error = %e, "Request failed");
    } else {
        warn!(error = %e, "Request rejected");
    }
    HttpResponse::build(status).json(ErrorBody {
        error: e.to_string(),
    })
}

fn invalid(e: validator::ValidationErrors) -> HttpResponse {
    fail(AppError::ValidationError(e.to_string()))
}

#[get("/health")]
async fn health(data: web::Data<HttpState>) -> impl Responder {
    let sessions = data.sessions.len().await;
    match data.pipeline.cache_stats() {
        Ok(cache) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "sessions": sessions,
            "profile_cache": cache,
        })),
        Err(e) => fail(e),
    }
}

#[post("/sessions")]
async fn create_session(data: web::Data<HttpState>) -> impl Responder {
    let session_id = data.sessions.create().await;
    info!(session = %session_id, "Session created");
    HttpResponse::Created().json(SessionCreated { session_id })
}

#[delete("/sessions/{id}")]
async fn delete_session(data: web::Data<HttpState>, path: web::Path<Uuid>) -> impl Responder {
    let id = path.into_inner();
    match data.sessions.remove(id).await {
        Ok(()) => {
            info!(session = %id, "Session closed");
            HttpResponse::NoContent().finish()
        }
        Err(e) => fail(e),
    }
}

async fn load(data: &HttpState, id: Uuid, input: DatasetInput) -> HttpResponse {
    let session = match data.sessions.get(id).await {
        Ok(session) => session,
        Err(e) => return fail(e),
    };
    let mut session = session.lock().await;
    match data.pipeline.load_dataset(&mut session, input) {
        Ok(profile) => HttpResponse::Ok().json(profile.as_ref()),
        Err(e) => fail(e),
    }
}

#[put("/sessions/{id}/dataset")]
async fn put_dataset(
    data: web::Data<HttpState>,
    path: web::Path<Uuid>,
    req: web::Json<DatasetRequest>,
) -> impl Responder {
    if let Err(e) = req.validate() {
        return invalid(e);
    }
    let req = req.into_inner();
    let input = DatasetInput {
        columns: req.columns,
        rows: req.rows,
        declared_kinds: req.declared_kinds,
    };
    load(&data, path.into_inner(), input).await
}

#[put("/sessions/{id}/dataset/csv")]
async fn put_dataset_csv(
    data: web::Data<HttpState>,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> impl Responder {
    match CsvParser::new().parse_bytes(&body) {
        Ok(input) => load(&data, path.into_inner(), input).await,
        Err(e) => fail(e),
    }
}

#[get("/sessions/{id}/profile")]
async fn get_profile(data: web::Data<HttpState>, path: web::Path<Uuid>) -> impl Responder {
    let session = match data.sessions.get(path.into_inner()).await {
        Ok(session) => session,
        Err(e) => return fail(e),
    };
    let session = session.lock().await;
    match session.active() {
        Ok((_, profile)) => HttpResponse::Ok().json(profile.as_ref()),
        Err(e) => fail(e),
    }
}

#[post("/sessions/{id}/query")]
async fn query(
    data: web::Data<HttpState>,
    path: web::Path<Uuid>,
    req: web::Json<QueryRequest>,
) -> impl Responder {
    if let Err(e) = req.validate() {
        return invalid(e);
    }
    let session = match data.sessions.get(path.into_inner()).await {
        Ok(session) => session,
        Err(e) => return fail(e),
    };
    let mut session = session.lock().await;

    let answer = if req.auto_execute {
        data.pipeline.ask(&mut session, &req.query).await
    } else {
        data.pipeline
            .parse(&session, &req.query)
            .await
            .map(|parse| QueryAnswer {
                parse,
                outcome: None,
            })
    };

    match answer {
        Ok(answer) => HttpResponse::Ok().json(answer),
        Err(e) => fail(e),
    }
}

#[post("/sessions/{id}/execute")]
async fn execute(
    data: web::Data<HttpState>,
    path: web::Path<Uuid>,
    req: web::Json<ExecuteRequest>,
) -> impl Responder {
    if let Err(e) = req.validate() {
        return invalid(e);
    }
    let session = match data.sessions.get(path.into_inner()).await {
        Ok(session) => session,
        Err(e) => return fail(e),
    };
    let mut session = session.lock().await;

    match data
        .pipeline
        .run(
            &mut session,
            &req.query,
            &req.operation,
            req.dataset_fingerprint.as_deref(),
        )
        .await
    {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(e) => fail(e),
    }
}

#[get("/sessions/{id}/history")]
async fn get_history(data: web::Data<HttpState>, path: web::Path<Uuid>) -> impl Responder {
    let session = match data.sessions.get(path.into_inner()).await {
        Ok(session) => session,
        Err(e) => return fail(e),
    };
    let session = session.lock().await;
    match data.pipeline.export_history(&session) {
        Ok(json) => HttpResponse::Ok()
            .content_type("application/json")
            .body(json),
        Err(e) => fail(e),
    }
}

#[put("/sessions/{id}/history")]
async fn put_history(
    data: web::Data<HttpState>,
    path: web::Path<Uuid>,
    body: String,
) -> impl Responder {
    let session = match data.sessions.get(path.into_inner()).await {
        Ok(session) => session,
        Err(e) => return fail(e),
    };
    let mut session = session.lock().await;
    match data.pipeline.load_history(&mut session, &body) {
        Ok(entries) => HttpResponse::Ok().json(serde_json::json!({ "entries": entries })),
        Err(e) => fail(e),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(health)
            .service(create_session)
            .service(delete_session)
            .service(put_dataset_csv)
            .service(put_dataset)
            .service(get_profile)
            .service(query)
            .service(execute)
            .service(get_history)
            .service(put_history),
    );
}

pub fn start_server(state: web::Data<HttpState>, config: &ServerConfig) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        let cors = Cors::permissive(); // Local tool; any origin

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(64 * 1024 * 1024))
            .app_data(web::JsonConfig::default().limit(64 * 1024 * 1024))
            .configure(configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run();

    info!(host = %config.host, port = config.port, "HTTP API listening");
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::QueryPipeline;
    use crate::domain::pipeline_config::PipelineConfig;
    use actix_web::{body::to_bytes, test as actix_test};
    use std::sync::Arc;

    fn state() -> web::Data<HttpState> {
        web::Data::new(HttpState::new(Arc::new(QueryPipeline::new(
            PipelineConfig::default(),
            None,
        ))))
    }

    const CSV: &str = "product_name,quarter,net_revenue\n\
                       Widget,2024-Q3,900\n\
                       Widget,2024-Q4,250\n\
                       Gadget,2024-Q4,300\n\
                       Gizmo,2024-Q4,40\n";

    #[actix_web::test]
    async fn test_session_flow() {
        let app = actix_test::init_service(App::new().app_data(state()).configure(configure)).await;

        let created: serde_json::Value = actix_test::call_and_read_body_json(
            &app,
            actix_test::TestRequest::post().uri("/api/sessions").to_request(),
        )
        .await;
        let id = created["session_id"].as_str().unwrap().to_string();

        let resp = actix_test::call_service(
            &app,
            actix_test::TestRequest::put()
                .uri(&format!("/api/sessions/{}/dataset/csv", id))
                .set_payload(CSV)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let answer: serde_json::Value = actix_test::call_and_read_body_json(
            &app,
            actix_test::TestRequest::post()
                .uri(&format!("/api/sessions/{}/query", id))
                .set_json(serde_json::json!({ "query": "top 2 products this quarter", "auto_execute": true }))
                .to_request(),
        )
        .await;
        assert_eq!(answer["parse"]["primary"]["confidence"], "high");
        assert_eq!(answer["outcome"]["status"], "executed");
        assert_eq!(answer["outcome"]["result"]["table"]["rows"].as_array().unwrap().len(), 2);

        let history = actix_test::call_service(
            &app,
            actix_test::TestRequest::get()
                .uri(&format!("/api/sessions/{}/history", id))
                .to_request(),
        )
        .await;
        let saved = to_bytes(history.into_body()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&saved).unwrap();
        assert_eq!(parsed["entries"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_errors_map_to_client_statuses() {
        let app = actix_test::init_service(App::new().app_data(state()).configure(configure)).await;

        let missing = actix_test::call_service(
            &app,
            actix_test::TestRequest::get()
                .uri(&format!("/api/sessions/{}/profile", Uuid::new_v4()))
                .to_request(),
        )
        .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let created: serde_json::Value = actix_test::call_and_read_body_json(
            &app,
            actix_test::TestRequest::post().uri("/api/sessions").to_request(),
        )
        .await;
        let id = created["session_id"].as_str().unwrap().to_string();

        let empty_query = actix_test::call_service(
            &app,
            actix_test::TestRequest::post()
                .uri(&format!("/api/sessions/{}/query", id))
                .set_json(serde_json::json!({ "query": "" }))
                .to_request(),
        )
        .await;
        assert_eq!(empty_query.status(), StatusCode::BAD_REQUEST);

        let no_dataset = actix_test::call_service(
            &app,
            actix_test::TestRequest::post()
                .uri(&format!("/api/sessions/{}/query", id))
                .set_json(serde_json::json!({ "query": "show all data" }))
                .to_request(),
        )
        .await;
        assert_eq!(no_dataset.status(), StatusCode::NOT_FOUND);

        let duplicate_columns = actix_test::call_service(
            &app,
            actix_test::TestRequest::put()
                .uri(&format!("/api/sessions/{}/dataset", id))
                .set_json(serde_json::json!({ "columns": ["a", "a"], "rows": [] }))
                .to_request(),
        )
        .await;
        assert_eq!(duplicate_columns.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&AppError::StaleOperation("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&AppError::Internal("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
