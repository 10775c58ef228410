//! HTTP server example
//!
//! Runs the download pipeline behind the HTTP API over a local vault
//! directory, seeding one public demo resource on first start.
//!
//! ```text
//! cargo run --example serve -- [config.json]
//! ```
//!
//! After starting, you can:
//! - Download a file:   curl -OJ http://localhost:6790/download/demo0001/data/contents/readme.txt
//! - Zip a folder:      curl http://localhost:6790/rest_download/demo0001/data/contents/tables
//! - Request the bag:   curl http://localhost:6790/rest_download/bags/demo0001.zip
//! - Poll a task:       curl http://localhost:6790/rest_task_status/<task_id>
//! - Stream events:     curl -N http://localhost:6790/events
//! - Browse the API:    http://localhost:6790/swagger-ui

use irods_stage::db::NewResource;
use irods_stage::{Config, DownloadService, ObjectStore, ResourceKind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEMO_RESOURCE: &str = "demo0001";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("irods_stage=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&PathBuf::from(path)).await?,
        None => Config::default(),
    };

    let service = DownloadService::new(config.clone()).await?;
    seed_demo_resource(&service).await?;

    let service = Arc::new(service);
    let config = Arc::new(config);

    println!("irods-stage listening on http://{}", config.server.api.bind_address);
    println!("  curl -OJ http://{}/download/{}/data/contents/readme.txt", config.server.api.bind_address, DEMO_RESOURCE);
    println!("  curl http://{}/rest_download/bags/{}.zip", config.server.api.bind_address, DEMO_RESOURCE);

    let server = tokio::spawn(irods_stage::api::start_api_server(service.clone(), config));

    irods_stage::run_with_shutdown((*service).clone()).await?;
    server.abort();

    Ok(())
}

async fn seed_demo_resource(service: &DownloadService) -> irods_stage::Result<()> {
    if service.db.get_resource(DEMO_RESOURCE).await?.is_some() {
        return Ok(());
    }

    service
        .db
        .insert_resource(&NewResource {
            id: DEMO_RESOURCE.to_string(),
            kind: ResourceKind::Composite,
            title: "Demo watershed dataset".to_string(),
            public: true,
            federated: false,
        })
        .await?;

    let store = service.store();
    let contents = format!("{}/data/contents", DEMO_RESOURCE);
    store
        .put_bytes(
            &format!("{}/readme.txt", contents),
            b"Demo resource served by irods-stage.\n".to_vec(),
        )
        .await?;
    store
        .put_bytes(
            &format!("{}/tables/flow.csv", contents),
            b"date,cfs\n2024-01-01,12.5\n2024-01-02,13.1\n".to_vec(),
        )
        .await?;
    store
        .put_bytes(
            &format!("{}/tables/stage.csv", contents),
            b"date,ft\n2024-01-01,2.1\n2024-01-02,2.3\n".to_vec(),
        )
        .await?;

    tracing::info!(resource_id = DEMO_RESOURCE, "seeded demo resource");
    Ok(())
}
