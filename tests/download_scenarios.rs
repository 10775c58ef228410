//! End-to-end download scenarios through the HTTP router
//!
//! Each test runs a real service over a temp-dir vault and SQLite database
//! and drives it with `tower::ServiceExt::oneshot`.

mod common;

use axum::http::{StatusCode, header};
use common::*;
use irods_stage::{FlagState, TaskId};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn task_id_of(json: &serde_json::Value) -> TaskId {
    json["task_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn regular_file_streams_with_its_basename() {
    let env = test_env(|_| {}).await;
    env.resource("abc123", true).await;
    env.put("abc123/data/contents/myfile.txt", b"some file contents").await;

    let response = env.get("/download/abc123/data/contents/myfile.txt", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"myfile.txt\""
    );
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(body_bytes(response).await, b"some file contents");
}

#[tokio::test]
async fn folder_is_zipped_even_when_zipped_is_false() {
    let env = test_env(|_| {}).await;
    env.resource("abc123", true).await;
    env.put("abc123/data/contents/myfolder/one.txt", b"1").await;
    env.put("abc123/data/contents/myfolder/nested/two.txt", b"2").await;

    let response = env
        .get("/rest_download/abc123/data/contents/myfolder?zipped=false", &[])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["zip_status"], "Not ready");

    let download_path = json["download_path"].as_str().unwrap().to_string();
    let output_path = download_path.strip_prefix("/rest_download/").unwrap();
    let segments: Vec<&str> = output_path.split('/').collect();
    assert_eq!(segments[0], "zips");
    assert!(chrono::NaiveDate::parse_from_str(segments[1], "%Y-%m-%d").is_ok());
    assert_eq!(segments[2].len(), 32);
    assert!(segments[2].chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(
        segments[3..].join("/"),
        "abc123/data/contents/myfolder.zip"
    );

    let result = wait_for_task(&env.service, task_id_of(&json), WAIT).await;
    assert_eq!(result, WaitResult::Succeeded(output_path.to_string()));

    // Round trip: the published zip reproduces the folder
    assert_eq!(
        zip_entry_names(&env.service, output_path).await,
        vec!["myfolder/nested/two.txt", "myfolder/one.txt"]
    );

    let response = env.get(&download_path, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    let bytes = body_bytes(response).await;
    assert_eq!(zip_entry(&bytes, "myfolder/one.txt"), "1");
}

#[tokio::test]
async fn dirty_metadata_bag_request_regenerates_and_builds() {
    let env = test_env(|_| {}).await;
    env.resource("abc123", true).await;
    env.put("abc123/data/contents/myfile.txt", b"hello").await;
    let before = env.service.db.get_resource("abc123").await.unwrap().unwrap();
    assert!(before.metadata_dirty.needs_work());

    let response = env.get("/rest_download/bags/abc123.zip", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["bag_status"], "Not ready");

    let resource = env.service.db.get_resource("abc123").await.unwrap().unwrap();
    assert_eq!(resource.metadata_dirty, FlagState::Clean);

    let result = wait_for_task(&env.service, task_id_of(&json), WAIT).await;
    assert_eq!(result, WaitResult::Succeeded("bags/abc123.zip".to_string()));

    let resource = env.service.db.get_resource("abc123").await.unwrap().unwrap();
    assert_eq!(resource.bag_modified, FlagState::Clean);

    let names = zip_entry_names(&env.service, "bags/abc123.zip").await;
    for expected in [
        "abc123/bagit.txt",
        "abc123/bag-info.txt",
        "abc123/manifest-md5.txt",
        "abc123/tagmanifest-md5.txt",
        "abc123/data/contents/myfile.txt",
        "abc123/data/resourcemetadata.xml",
    ] {
        assert!(names.contains(&expected.to_string()), "missing {expected} in {names:?}");
    }

    // Fresh now: the same request streams the bag
    let response = env.get("/rest_download/bags/abc123.zip", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body_bytes(response).await;
    let manifest = zip_entry(&bytes, "abc123/manifest-md5.txt");
    assert!(manifest.contains(&format!(
        "{:x}  data/contents/myfile.txt",
        md5::compute(b"hello")
    )));
}

#[tokio::test]
async fn unauthorized_user_gets_401_and_nothing_happens() {
    let env = test_env(|_| {}).await;
    env.resource("abc123", false).await;
    env.put("abc123/data/contents/myfolder/one.txt", b"1").await;
    let mut events = env.service.subscribe();

    for uri in [
        "/download/abc123/data/contents/myfolder/one.txt",
        "/download/abc123/data/contents/myfolder?zipped=true",
        "/download/bags/abc123.zip",
        "/rest_download/bags/abc123.zip",
    ] {
        let response = env.get(uri, &[("x-remote-user", "mallory")]).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }

    assert!(events.try_recv().is_err());
    assert!(env.service.db.pending_bag_task("abc123").await.unwrap().is_none());
    assert!(!env.service.store().exists("bags/abc123.zip").await.unwrap());
    let resource = env.service.db.get_resource("abc123").await.unwrap().unwrap();
    assert_eq!(resource.metadata_dirty, FlagState::Unknown);
    assert_eq!(resource.download_count, 0);
}

#[tokio::test]
async fn simultaneous_bag_requests_share_one_task() {
    let env = test_env(|config| {
        config.download.bag_build_delay = Duration::from_millis(300);
    })
    .await;
    env.resource("abc123", true).await;
    env.put("abc123/data/contents/myfile.txt", b"hello").await;
    env.service.db.mark_resource_modified("abc123").await.unwrap();

    let (first, second) = tokio::join!(
        env.get("/rest_download/bags/abc123.zip", &[]),
        env.get("/rest_download/bags/abc123.zip", &[])
    );
    let first = task_id_of(&body_json(first).await);
    let second = task_id_of(&body_json(second).await);
    assert_eq!(first, second);

    assert_eq!(
        wait_for_task(&env.service, first, WAIT).await,
        WaitResult::Succeeded("bags/abc123.zip".to_string())
    );
}

#[tokio::test]
async fn bag_ensure_fresh_twice_builds_once() {
    let env = test_env(|config| config.download.use_async = false).await;
    env.resource("abc123", true).await;
    env.put("abc123/data/contents/myfile.txt", b"hello").await;

    let response = env.get("/rest_download/bags/abc123.zip", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let generation = env
        .service
        .db
        .get_resource("abc123")
        .await
        .unwrap()
        .unwrap()
        .bag_generation;

    let response = env.get("/rest_download/bags/abc123.zip", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let resource = env.service.db.get_resource("abc123").await.unwrap().unwrap();
    assert_eq!(resource.bag_generation, generation);
    assert_eq!(resource.bag_modified, FlagState::Clean);
    assert_eq!(resource.download_count, 2);
}

#[tokio::test]
async fn deleted_bag_is_rebuilt() {
    let env = test_env(|config| config.download.use_async = false).await;
    env.resource("abc123", true).await;
    env.put("abc123/data/contents/myfile.txt", b"hello").await;

    let response = env.get("/rest_download/bags/abc123.zip", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(env.service.store().delete("bags/abc123.zip").await.unwrap());

    let response = env.get("/rest_download/bags/abc123.zip", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(env.service.store().exists("bags/abc123.zip").await.unwrap());
}

#[tokio::test]
async fn single_file_zip_contains_only_that_file() {
    let env = test_env(|config| config.download.use_async = false).await;
    env.resource("abc123", true).await;
    env.put("abc123/data/contents/report.pdf", b"%PDF").await;
    env.put("abc123/data/contents/other.pdf", b"%PDF").await;

    let response = env
        .get("/download/abc123/data/contents/report.pdf?zipped=true", &[])
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body_bytes(response).await;
    assert_eq!(zip_entry_names_from_bytes(bytes), vec!["report.pdf"]);
}
