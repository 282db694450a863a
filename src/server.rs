//! Shared endpoints and per-stage server startup.

use std::io::Write;
use std::time::Duration;

use actix_files::Files;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, get, web};
use serde_json::json;
use uuid::Uuid;

use crate::age_screen::{self, AgeScreenerState};
use crate::artifact::ArtifactStore;
use crate::config::{StageConfig, StageKind};
use crate::forward::{Forwarder, RetryPolicy, StageTarget};
use crate::gatekeeper::{self, GatekeeperState};
use crate::region_screen::{self, RegionClassifierState};

const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity and downstream info shared by the liveness endpoints.
pub struct StageInfo {
    pub kind: StageKind,
    pub downstream: Option<StageTarget>,
    pub client: reqwest::Client,
}

#[get("/")]
pub async fn home(_req: HttpRequest, info: web::Data<StageInfo>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": format!("{} is running", info.kind.title()),
        "stage": info.kind.as_str(),
        "status": "healthy",
    }))
}

#[get("/health")]
pub async fn health(_req: HttpRequest, info: web::Data<StageInfo>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "message": format!("{} is running", info.kind.title()),
        "stage": info.kind.as_str(),
    }))
}

/// Pings the next stage's `/health` to keep it warm; returns the composite
/// status so operators can see both ends at once.
#[get("/keepalive")]
pub async fn keepalive(_req: HttpRequest, info: web::Data<StageInfo>) -> HttpResponse {
    let downstream_status = match &info.downstream {
        None => "none".to_string(),
        Some(target) => {
            let url = target.api_path("/health");
            match info.client.get(&url).timeout(KEEPALIVE_TIMEOUT).send().await {
                Ok(resp) if resp.status().is_success() => "healthy".to_string(),
                Ok(resp) => format!("error_{}", resp.status().as_u16()),
                Err(e) => format!("error: {e}"),
            }
        }
    };
    HttpResponse::Ok().json(json!({
        "stage": info.kind.as_str(),
        "status": "healthy",
        "downstream_service": downstream_status,
        "timestamp": Uuid::new_v4().to_string(),
    }))
}

fn init_logging() {
    // default level is info
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .init();
}

fn build_forwarder(
    downstream_url: &Option<String>,
    endpoint: &str,
) -> anyhow::Result<Option<Forwarder>> {
    downstream_url
        .as_deref()
        .map(|url| Forwarder::new(StageTarget::new(url), endpoint, RetryPolicy::default()))
        .transpose()
}

pub async fn startup(cfg: StageConfig) -> anyhow::Result<()> {
    init_logging();
    println!(
        "Starting {} at {}:{}",
        cfg.kind.title(),
        cfg.host,
        cfg.port
    );

    let vision = crate::backends::heuristic_stack();
    let bind = (cfg.host.clone(), cfg.port);

    match cfg.kind {
        StageKind::Gatekeeper => {
            let temp_dir = cfg.data_dir.join("temp_face_inputs");
            std::fs::create_dir_all(&temp_dir)?;
            let store = ArtifactStore::new(cfg.data_dir.join("temp_face_outputs"), "/annotated_face")?;
            let serve_dir = store.dir().to_path_buf();
            let forwarder = build_forwarder(&cfg.downstream_url, "/process")?;
            let info = web::Data::new(StageInfo {
                kind: cfg.kind,
                downstream: forwarder.as_ref().map(|f| f.target().clone()),
                client: reqwest::Client::builder().build()?,
            });
            let state = web::Data::new(GatekeeperState {
                vision,
                temp_dir,
                store,
                forwarder,
            });
            HttpServer::new(move || {
                App::new()
                    .wrap(actix_web::middleware::Logger::default())
                    .app_data(state.clone())
                    .app_data(info.clone())
                    .service(home)
                    .service(health)
                    .service(keepalive)
                    .service(gatekeeper::filter_face)
                    .service(Files::new("/annotated_face", serve_dir.clone()))
            })
            .bind(bind)?
            .run()
            .await?;
        }
        StageKind::AgeScreener => {
            let temp_dir = cfg.data_dir.join("temp_age_inputs");
            std::fs::create_dir_all(&temp_dir)?;
            let age_store = ArtifactStore::new(cfg.data_dir.join("temp_age_outputs"), "/annotated_age")?;
            let relocated_store = ArtifactStore::new(cfg.data_dir.join("annotated"), "/annotated")?;
            let age_dir = age_store.dir().to_path_buf();
            let relocated_dir = relocated_store.dir().to_path_buf();
            let forwarder = build_forwarder(&cfg.downstream_url, "/predict")?;
            let info = web::Data::new(StageInfo {
                kind: cfg.kind,
                downstream: forwarder.as_ref().map(|f| f.target().clone()),
                client: reqwest::Client::builder().build()?,
            });
            let state = web::Data::new(AgeScreenerState {
                vision,
                temp_dir,
                age_store,
                relocated_store,
                forwarder,
            });
            HttpServer::new(move || {
                App::new()
                    .wrap(actix_web::middleware::Logger::default())
                    .app_data(state.clone())
                    .app_data(info.clone())
                    .service(home)
                    .service(health)
                    .service(keepalive)
                    .service(age_screen::process)
                    .service(Files::new("/annotated_age", age_dir.clone()))
                    .service(Files::new("/annotated", relocated_dir.clone()))
            })
            .bind(bind)?
            .run()
            .await?;
        }
        StageKind::RegionClassifier => {
            let temp_dir = cfg.data_dir.join("temp_inputs");
            std::fs::create_dir_all(&temp_dir)?;
            let store = ArtifactStore::new(cfg.data_dir.join("temp_outputs"), "/annotated")?;
            let serve_dir = store.dir().to_path_buf();
            let info = web::Data::new(StageInfo {
                kind: cfg.kind,
                downstream: None,
                client: reqwest::Client::builder().build()?,
            });
            let state = web::Data::new(RegionClassifierState {
                vision,
                temp_dir,
                store,
            });
            HttpServer::new(move || {
                App::new()
                    .wrap(actix_web::middleware::Logger::default())
                    .app_data(state.clone())
                    .app_data(info.clone())
                    .service(home)
                    .service(health)
                    .service(keepalive)
                    .service(region_screen::predict)
                    .service(Files::new("/annotated", serve_dir.clone()))
            })
            .bind(bind)?
            .run()
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;

    #[actix_web::test]
    async fn test_health_reports_stage_identity() {
        let info = web::Data::new(StageInfo {
            kind: StageKind::AgeScreener,
            downstream: None,
            client: reqwest::Client::new(),
        });
        let app = test::init_service(App::new().app_data(info).service(health)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["stage"], "age_screener");
    }

    #[actix_web::test]
    async fn test_keepalive_without_downstream() {
        let info = web::Data::new(StageInfo {
            kind: StageKind::RegionClassifier,
            downstream: None,
            client: reqwest::Client::new(),
        });
        let app = test::init_service(App::new().app_data(info).service(keepalive)).await;
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/keepalive").to_request()).await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["downstream_service"], "none");
        assert_eq!(body["stage"], "region_classifier");
    }
}
