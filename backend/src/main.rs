mod archive;
mod auth;
mod config;
mod db;
mod error;
mod inference;
mod routes;
mod storage;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use archive::PredictionArchive;
use auth::Authenticator;
use auth::jwt::JwtService;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use config::{ServiceConfig, StorageBackend};
use db::dynamodb_repository::DynamoDbRepository;
use db::{MemoryRecordStore, RecordStore};
use inference::{ModelLoader, PredictionService};
use routes::configure_routes;
use shared::LifecycleStatus;
use std::io;
use std::sync::Arc;
use storage::s3_service::S3Service;
use storage::{MemoryObjectStore, ObjectStore};

#[cfg(feature = "torch")]
fn model_loader(config: &ServiceConfig) -> ModelLoader {
    let model_path = config.model_path.clone();
    Box::new(move || {
        let model = inference::torch::TorchModel::load(&model_path)?;
        Ok(Box::new(model) as Box<dyn inference::ClassifierModel>)
    })
}

#[cfg(not(feature = "torch"))]
fn model_loader(config: &ServiceConfig) -> ModelLoader {
    let model_path = config.model_path.display().to_string();
    Box::new(move || {
        Err(inference::ScoreError::Load(format!(
            "cannot load {}: built without the `torch` feature",
            model_path
        )))
    })
}

async fn build_archive(config: &ServiceConfig) -> PredictionArchive {
    let (objects, records): (Arc<dyn ObjectStore>, Arc<dyn RecordStore>) = match config.storage {
        StorageBackend::Aws => {
            let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
            let s3_service = S3Service::new(S3Client::new(&aws_config));
            let db_repo = DynamoDbRepository::new(
                DynamoDbClient::new(&aws_config),
                config.predictions_table.clone(),
            );
            (Arc::new(s3_service), Arc::new(db_repo))
        }
        StorageBackend::Memory => {
            log::warn!("Using in-memory storage; images and history are lost on restart");
            (
                Arc::new(MemoryObjectStore::default()),
                Arc::new(MemoryRecordStore::default()),
            )
        }
    };
    PredictionArchive::new(objects, records, config.images_bucket.clone())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = ServiceConfig::load().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(config.log_filter()));

    let jwt_secret = config.jwt_secret.clone().ok_or_else(|| {
        log::error!("JWT_SECRET is not set");
        io::Error::new(io::ErrorKind::InvalidInput, "JWT_SECRET is not set")
    })?;

    log::info!(
        "Starting BanaMon API (environment: {}, model: {})",
        config.environment,
        config.model_path.display()
    );

    let (service, dispatch) = PredictionService::start(&config, model_loader(&config))?;
    match service.ready().await {
        LifecycleStatus::Ready => log::info!("Model {} loaded", config.model_version),
        status => log::error!(
            "Model failed to load (status: {}); predictions will be refused",
            status
        ),
    }

    let archive = build_archive(&config).await;
    let authenticator: Arc<dyn Authenticator> = Arc::new(JwtService::new(&jwt_secret));

    let service_data = web::Data::new(service);
    let archive_data = web::Data::new(archive);
    let auth_data = web::Data::from(authenticator);

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    let server_result = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(service_data.clone())
            .app_data(archive_data.clone())
            .app_data(auth_data.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await;

    log::info!("Server stopped; draining prediction queue");
    dispatch.stop().await;
    log::info!("Prediction queue drained");
    server_result
}
