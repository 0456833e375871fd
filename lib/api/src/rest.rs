use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Result as ActixResult};
use dealsim_core::{Error, RawRepresentation};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::service::{FeedbackRequest, SearchRequest, SimilarityService};

#[derive(Deserialize)]
struct UpsertDealsRequest {
    deals: Vec<RawRepresentation>,
}

#[derive(Deserialize)]
struct CallerQuery {
    caller: Option<String>,
}

#[derive(Deserialize)]
struct StatsQuery {
    context: Option<String>,
}

#[derive(Deserialize)]
struct RollbackRequest {
    version: u64,
    caller: Option<String>,
}

pub struct RestApi;

impl RestApi {
    pub async fn start(service: Arc<SimilarityService>, port: u16) -> std::io::Result<()> {
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .wrap(cors)
                .configure(|cfg| Self::configure(cfg, service.clone()))
        })
        .bind(("0.0.0.0", port))?
        .run()
        .await
    }

    /// Register every route; shared by the server and the handler tests.
    pub fn configure(cfg: &mut web::ServiceConfig, service: Arc<SimilarityService>) {
        cfg.app_data(web::Data::new(service))
            .route("/health", web::get().to(health))
            .route("/search", web::post().to(search))
            .route("/feedback", web::post().to(submit_feedback))
            .route("/feedback/stats", web::get().to(feedback_stats))
            .route("/attribution/{query_id}/{candidate_id}", web::get().to(get_attribution))
            .route("/profiles/{context}/versions", web::get().to(list_profile_versions))
            .route("/profiles/{context}/rollback", web::post().to(rollback_profile))
            .route("/deals", web::post().to(upsert_deals))
            .route("/deals/{deal_id}", web::get().to(get_deal));
    }
}

fn error_response(e: &Error) -> HttpResponse {
    let body = serde_json::json!({ "error": e.to_string() });
    match e {
        Error::IncompleteRepresentation { .. }
        | Error::MissingModality(_)
        | Error::VersionMismatch { .. }
        | Error::InvalidDimension { .. }
        | Error::InvalidWeights(_)
        | Error::InvalidConfig(_) => HttpResponse::BadRequest().json(body),
        Error::ProfileNotFound(_) => HttpResponse::NotFound().json(body),
        Error::RetrievalTimeout(_) => HttpResponse::GatewayTimeout().json(body),
        _ => {
            warn!("Request failed: {}", e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

async fn health(service: web::Data<Arc<SimilarityService>>) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(service.health()))
}

async fn search(
    service: web::Data<Arc<SimilarityService>>,
    req: web::Json<SearchRequest>,
) -> ActixResult<HttpResponse> {
    match service.search(req.into_inner()).await {
        Ok(result) => Ok(HttpResponse::Ok().json(serde_json::json!({ "result": result }))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn submit_feedback(
    service: web::Data<Arc<SimilarityService>>,
    req: web::Json<FeedbackRequest>,
) -> ActixResult<HttpResponse> {
    match service.submit_feedback(req.into_inner()) {
        Ok(ack) => Ok(HttpResponse::Ok().json(serde_json::json!({ "result": ack }))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn feedback_stats(
    service: web::Data<Arc<SimilarityService>>,
    query: web::Query<StatsQuery>,
) -> ActixResult<HttpResponse> {
    match service.feedback_stats(query.context.as_deref()) {
        Ok(stats) => Ok(HttpResponse::Ok().json(serde_json::json!({ "result": stats }))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn get_attribution(
    service: web::Data<Arc<SimilarityService>>,
    path: web::Path<(String, String)>,
) -> ActixResult<HttpResponse> {
    let (query_id, candidate_id) = path.into_inner();

    match service.get_attribution(&query_id, &candidate_id) {
        Some(attribution) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "result": {
                "summary": attribution.summary(),
                "breakdown": attribution,
            }
        }))),
        None => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": "Candidate not found in the last result set for this query"
        }))),
    }
}

async fn list_profile_versions(
    service: web::Data<Arc<SimilarityService>>,
    path: web::Path<String>,
    query: web::Query<CallerQuery>,
) -> ActixResult<HttpResponse> {
    let context = path.into_inner();

    match service.list_weight_profile_versions(&context, query.caller.as_deref()) {
        Ok(versions) => Ok(HttpResponse::Ok().json(serde_json::json!({ "result": versions }))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn rollback_profile(
    service: web::Data<Arc<SimilarityService>>,
    path: web::Path<String>,
    req: web::Json<RollbackRequest>,
) -> ActixResult<HttpResponse> {
    let context = path.into_inner();

    match service.rollback_weight_profile(&context, req.caller.as_deref(), req.version) {
        Ok(profile) => Ok(HttpResponse::Ok().json(serde_json::json!({ "result": profile.as_ref() }))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn upsert_deals(
    service: web::Data<Arc<SimilarityService>>,
    req: web::Json<UpsertDealsRequest>,
) -> ActixResult<HttpResponse> {
    match service.upsert_deals(req.into_inner().deals) {
        Ok(count) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "result": { "upserted": count }
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn get_deal(
    service: web::Data<Arc<SimilarityService>>,
    path: web::Path<String>,
) -> ActixResult<HttpResponse> {
    let deal_id = path.into_inner();

    match service.get_deal(&deal_id) {
        Ok(Some(deal)) => Ok(HttpResponse::Ok().json(serde_json::json!({ "result": deal.as_ref() }))),
        Ok(None) => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Deal {} not found", deal_id)
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}
