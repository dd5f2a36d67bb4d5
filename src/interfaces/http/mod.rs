use crate::application::use_cases::query_service::{QueryOutcome, QueryService};
use crate::domain::error::AppError;
use crate::infrastructure::db::TemplateStore;
use crate::infrastructure::response::{
    error_response, ndjson_line, stream_error_line, NDJSON_CONTENT_TYPE,
};
use actix_cors::Cors;
use actix_web::web::Bytes;
use actix_web::{dev::Server, get, post, web, App, HttpResponse, HttpServer, Responder};
use futures::{stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};

const NO_MATCH_MESSAGE: &str = "no matching template";

pub struct HttpState {
    pub service: Arc<QueryService>,
    pub templates: Arc<dyn TemplateStore>,
    pub include_meta: bool,
}

#[derive(Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[post("/query")]
async fn query(data: web::Data<HttpState>, body: web::Bytes) -> HttpResponse {
    // an unparsable body is treated like a missing prompt
    let prompt = serde_json::from_slice::<QueryRequest>(&body)
        .ok()
        .and_then(|req| req.prompt)
        .filter(|p| !p.trim().is_empty());
    let Some(prompt) = prompt else {
        return error_response(&AppError::ValidationError("missing query".to_string()));
    };

    info!("Query: {:?}", prompt);

    match data.service.answer(&prompt).await {
        Ok(QueryOutcome::Suggestions(suggestions)) if suggestions.is_empty() => {
            warn!("No rankable template for query");
            HttpResponse::Ok()
                .content_type(NDJSON_CONTENT_TYPE)
                .body(ndjson_line(&json!({ "matched": false, "error": NO_MATCH_MESSAGE })))
        }
        Ok(QueryOutcome::Suggestions(suggestions)) => {
            let mut body = Vec::new();
            for suggestion in &suggestions {
                body.extend_from_slice(&ndjson_line(suggestion));
            }
            HttpResponse::Ok()
                .content_type(NDJSON_CONTENT_TYPE)
                .body(body)
        }
        Ok(QueryOutcome::Rows { meta, mut rows }) => {
            // failures before the first row still get a proper status code
            let first = rows.next().await;
            let mut head: Vec<Bytes> = Vec::new();
            if data.include_meta {
                head.push(ndjson_line(&meta));
            }
            let params = serde_json::to_string(&meta.params).unwrap_or_default();
            match first {
                Some(Err(e)) => {
                    error!(template = %meta.template, params = %params, "Execution failed: {}", e);
                    return error_response(&e);
                }
                Some(Ok(row)) => head.push(ndjson_line(&row)),
                None => {}
            }

            let template = meta.template;
            let tail = rows.map(move |item| match item {
                Ok(row) => ndjson_line(&row),
                Err(e) => {
                    error!(template = %template, params = %params, "Stream aborted: {}", e);
                    stream_error_line(&e)
                }
            });
            let body = stream::iter(head).chain(tail).map(Ok::<Bytes, Infallible>);

            HttpResponse::Ok()
                .content_type(NDJSON_CONTENT_TYPE)
                .streaming(body)
        }
        Err(e) => {
            if e.is_user_error() {
                warn!("Query rejected: {}", e);
            } else {
                error!("Query failed: {}", e);
            }
            error_response(&e)
        }
    }
}

#[get("/health")]
async fn health(data: web::Data<HttpState>) -> impl Responder {
    let templates = data.service.template_count().await;
    HttpResponse::Ok().json(json!({ "status": "ok", "templates": templates }))
}

#[get("/templates")]
async fn list_templates(data: web::Data<HttpState>) -> impl Responder {
    HttpResponse::Ok().json(data.service.catalog_summary().await)
}

#[post("/templates/reload")]
async fn reload_templates(data: web::Data<HttpState>) -> HttpResponse {
    match data.service.reload(data.templates.as_ref()).await {
        Ok(count) => HttpResponse::Ok().json(json!({ "status": "ok", "templates": count })),
        Err(e) => {
            error!("Template reload failed: {}", e);
            error_response(&e)
        }
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(query)
        .service(health)
        .service(list_templates)
        .service(reload_templates);
}

pub fn start_server(state: HttpState, host: &str, port: u16) -> std::io::Result<Server> {
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .configure(routes)
    })
    .bind((host, port))?
    .run();

    info!("HTTP server listening on {}:{}", host, port);
    Ok(server)
}
