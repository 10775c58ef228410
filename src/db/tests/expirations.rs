use super::open;
use chrono::{Duration, Utc};

#[tokio::test]
async fn test_due_expirations_respect_deadline() {
    let (db, _file) = open().await;
    let now = Utc::now();

    db.schedule_expiration("zips/old.zip", now - Duration::hours(1))
        .await
        .unwrap();
    db.schedule_expiration("zips/new.zip", now + Duration::hours(23))
        .await
        .unwrap();

    assert_eq!(
        db.due_expirations(now).await.unwrap(),
        vec!["zips/old.zip".to_string()]
    );

    db.remove_expiration("zips/old.zip").await.unwrap();
    assert!(db.due_expirations(now).await.unwrap().is_empty());
    assert_eq!(
        db.due_expirations(now + Duration::hours(24)).await.unwrap(),
        vec!["zips/new.zip".to_string()]
    );
}

#[tokio::test]
async fn test_rescheduling_replaces_timer() {
    let (db, _file) = open().await;
    let now = Utc::now();

    db.schedule_expiration("zips/a.zip", now - Duration::minutes(5))
        .await
        .unwrap();
    db.schedule_expiration("zips/a.zip", now + Duration::hours(24))
        .await
        .unwrap();

    assert!(db.due_expirations(now).await.unwrap().is_empty());
}
