mod expirations;

use super::{Database, NewResource, NewTask};
use crate::types::{ResourceKind, TaskId, TaskKind};
use tempfile::NamedTempFile;

async fn open() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

async fn insert_resource(db: &Database, id: &str, public: bool) {
    db.insert_resource(&NewResource {
        id: id.to_string(),
        kind: ResourceKind::Composite,
        title: format!("Resource {id}"),
        public,
        federated: false,
    })
    .await
    .unwrap();
}

fn bag_task(resource_id: &str) -> NewTask {
    NewTask {
        task_id: TaskId::new(),
        kind: TaskKind::Bag,
        resource_id: resource_id.to_string(),
        source_path: resource_id.to_string(),
        output_path: format!("bags/{resource_id}.zip"),
        aggregation_name: None,
        single_file: false,
    }
}

fn zip_task(resource_id: &str) -> NewTask {
    NewTask {
        task_id: TaskId::new(),
        kind: TaskKind::Zip,
        resource_id: resource_id.to_string(),
        source_path: format!("{resource_id}/data/contents/folder"),
        output_path: format!("zips/2024-01-01/abc/{resource_id}/data/contents/folder.zip"),
        aggregation_name: None,
        single_file: false,
    }
}
