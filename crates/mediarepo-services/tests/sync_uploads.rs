mod helpers;

use helpers::*;
use mediarepo_core::{AppError, ErrorMetadata};
use mediarepo_storage::digest::sha256_bytes;

const BODY: &[u8] = b"some image bytes";

#[tokio::test]
async fn upload_stores_record_and_digest() {
    let ctx = setup(&[]).await;

    let record = ctx
        .uploads
        .upload_media(upload_request(BODY.len() as i64), reader(BODY))
        .await
        .unwrap();

    assert_eq!(record.datastore_id, "files");
    assert_eq!(record.size_bytes, BODY.len() as i64);
    assert_eq!(record.sha256_hash, sha256_bytes(BODY));
    assert_eq!(record.content_type, "image/png");
    assert_eq!(record.upload_name, "cat.png");
    assert_eq!(ctx.record(&record.media_id).await, record);
}

#[tokio::test]
async fn identical_content_reuses_existing_object() {
    let ctx = setup(&[]).await;

    let first = ctx
        .uploads
        .upload_media(upload_request(-1), reader(BODY))
        .await
        .unwrap();
    let second = ctx
        .uploads
        .upload_media(upload_request(-1), reader(BODY))
        .await
        .unwrap();

    assert_ne!(first.media_id, second.media_id);
    assert_eq!(first.location, second.location);
    assert_eq!(first.datastore_id, second.datastore_id);
    assert_eq!(ctx.store.len().await, 2);
}

#[tokio::test]
async fn upload_into_reservation() {
    let ctx = setup(&[]).await;
    let reservation = ctx.uploads.create_reservation(ORIGIN, USER, None).await.unwrap();

    let mut request = upload_request(BODY.len() as i64);
    request.media_id = Some(reservation.media_id.clone());
    let record = ctx.uploads.upload_media(request.clone(), reader(BODY)).await.unwrap();
    assert_eq!(record.media_id, reservation.media_id);
    assert!(record.is_finalized());
    assert_eq!(ctx.store.len().await, 1);

    let again = ctx.uploads.upload_media(request, reader(BODY)).await;
    assert!(matches!(again, Err(AppError::CannotOverwrite(_))));

    let mut unknown = upload_request(BODY.len() as i64);
    unknown.media_id = Some("not-reserved".to_string());
    let result = ctx.uploads.upload_media(unknown, reader(BODY)).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn upload_wakes_download_waiting_on_reservation() {
    let ctx = setup(&[]).await;
    let reservation = ctx.uploads.create_reservation(ORIGIN, USER, None).await.unwrap();

    let handle = ctx.state.waiters.start_wait(ORIGIN, &reservation.media_id);
    let mut request = upload_request(BODY.len() as i64);
    request.media_id = Some(reservation.media_id.clone());
    ctx.uploads.upload_media(request, reader(BODY)).await.unwrap();

    let notified = ctx
        .state
        .waiters
        .wait(handle, std::time::Duration::from_secs(1))
        .await;
    assert!(notified);
}

#[tokio::test]
async fn declared_length_over_limit_is_rejected() {
    let ctx = setup(&[("MAX_UPLOAD_SIZE_MB", "1")]).await;

    let result = ctx
        .uploads
        .upload_media(upload_request(2 * 1024 * 1024), reader(BODY))
        .await;
    assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
    assert!(ctx.store.is_empty().await);
}

#[tokio::test]
async fn unknown_length_over_limit_is_rejected_after_upload() {
    let ctx = setup(&[("MAX_UPLOAD_SIZE_MB", "1")]).await;
    let body = vec![7u8; 1024 * 1024 + 1];

    let mut request = upload_request(-1);
    request.content_length_header = Some("garbage".to_string());
    let result = ctx.uploads.upload_media(request, reader(&body)).await;
    assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
    assert!(ctx.store.is_empty().await);
}

#[tokio::test]
async fn content_length_header_is_used_when_nothing_declared() {
    let ctx = setup(&[("MIN_UPLOAD_SIZE_BYTES", "100")]).await;

    let mut request = upload_request(0);
    request.content_length_header = Some(BODY.len().to_string());
    let result = ctx.uploads.upload_media(request, reader(BODY)).await;
    assert!(matches!(result, Err(AppError::PayloadTooSmall(_))));
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let ctx = setup(&[]).await;
    let result = ctx.uploads.upload_media(upload_request(-1), reader(b"")).await;
    assert!(matches!(result, Err(AppError::PayloadTooSmall(_))));
    assert!(ctx.store.is_empty().await);
}

#[tokio::test]
async fn quota_blocks_further_uploads() {
    let ctx = setup(&[("QUOTA_ENABLED", "true"), ("QUOTA_MAX_BYTES_PER_USER", "10")]).await;

    ctx.uploads
        .upload_media(upload_request(BODY.len() as i64), reader(BODY))
        .await
        .unwrap();

    let result = ctx
        .uploads
        .upload_media(upload_request(3), reader(b"abc"))
        .await;
    assert!(matches!(result, Err(AppError::QuotaExceeded(_))));
    assert_eq!(ctx.store.len().await, 1);
}

#[tokio::test]
async fn concurrent_uploads_into_one_reservation_finalize_once() {
    let ctx = setup(&[]).await;
    let reservation = ctx.uploads.create_reservation(ORIGIN, USER, None).await.unwrap();

    let mut request = upload_request(-1);
    request.media_id = Some(reservation.media_id.clone());
    let (a, b) = tokio::join!(
        ctx.uploads.upload_media(request.clone(), reader(b"first writer")),
        ctx.uploads.upload_media(request, reader(b"second writer")),
    );

    let (winner, loser) = match (a, b) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        (a, b) => panic!("exactly one upload must win, got {:?} and {:?}", a.is_ok(), b.is_ok()),
    };
    assert!(matches!(loser, AppError::CannotOverwrite(_)));

    let stored = ctx.record(&reservation.media_id).await;
    assert_eq!(stored.location, winner.location);
    assert_eq!(stored.sha256_hash, winner.sha256_hash);
    assert_eq!(ctx.stored_files(), 1);
}

#[tokio::test]
async fn quarantined_content_is_refused() {
    let ctx = setup(&[]).await;
    let first = ctx
        .uploads
        .upload_media(upload_request(BODY.len() as i64), reader(BODY))
        .await
        .unwrap();

    let mut quarantined = first.clone();
    quarantined.media_id = "quarantined".to_string();
    quarantined.quarantined = true;
    mediarepo_db::MediaStore::create(ctx.store.as_ref(), &quarantined)
        .await
        .unwrap();

    let result = ctx
        .uploads
        .upload_media(upload_request(BODY.len() as i64), reader(BODY))
        .await;
    let Err(err) = result else {
        panic!("quarantined content was accepted");
    };
    assert!(matches!(err, AppError::ContentNotPermitted(_)));
    assert_eq!(err.client_message(), "This file is not permitted on this server");
    assert_eq!(ctx.store.len().await, 2);
    assert_eq!(ctx.stored_files(), 1);
}

#[tokio::test]
async fn unknown_length_body_is_capped_while_streaming() {
    let ctx = setup(&[("MAX_UPLOAD_SIZE_MB", "1")]).await;
    let total = 5 * 1024 * 1024;
    let (body, consumed) = counting_reader(vec![7u8; total]);

    let result = ctx.uploads.upload_media(upload_request(-1), body).await;

    assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
    assert_eq!(consumed.load(std::sync::atomic::Ordering::SeqCst), total);
    assert_eq!(ctx.stored_files(), 0);
    assert!(ctx.store.is_empty().await);
}

#[tokio::test]
async fn upload_name_keeps_only_the_final_path_component() {
    let ctx = setup(&[]).await;
    let mut request = upload_request(BODY.len() as i64);
    request.filename = "../../etc/cat.png".to_string();

    let record = ctx.uploads.upload_media(request, reader(BODY)).await.unwrap();
    assert_eq!(record.upload_name, "cat.png");
    assert_eq!(ctx.record(&record.media_id).await.upload_name, "cat.png");
}

#[tokio::test]
async fn room_references_are_recorded() {
    let ctx = setup(&[]).await;

    let mut request = upload_request(BODY.len() as i64);
    request.room_id = Some("!room:example.org".to_string());
    let uploaded = ctx.uploads.upload_media(request, reader(BODY)).await.unwrap();

    let reservation = ctx
        .uploads
        .create_reservation(ORIGIN, USER, Some("!other:example.org"))
        .await
        .unwrap();

    ctx.uploads
        .add_media_reference(ORIGIN, &uploaded.media_id, "!third:example.org")
        .await
        .unwrap();

    let rooms = mediarepo_db::MediaStore::references(ctx.store.as_ref(), ORIGIN, &uploaded.media_id)
        .await
        .unwrap();
    assert_eq!(rooms, vec!["!room:example.org".to_string(), "!third:example.org".to_string()]);

    let reserved_rooms =
        mediarepo_db::MediaStore::references(ctx.store.as_ref(), ORIGIN, &reservation.media_id)
            .await
            .unwrap();
    assert_eq!(reserved_rooms, vec!["!other:example.org".to_string()]);
}

#[tokio::test]
async fn media_reference_needs_known_media_and_a_room() {
    let ctx = setup(&[]).await;

    let unknown = ctx
        .uploads
        .add_media_reference(ORIGIN, "missing", "!room:example.org")
        .await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));

    let record = ctx
        .uploads
        .upload_media(upload_request(BODY.len() as i64), reader(BODY))
        .await
        .unwrap();
    let empty = ctx.uploads.add_media_reference(ORIGIN, &record.media_id, " ").await;
    assert!(matches!(empty, Err(AppError::InvalidInput(_))));
}
