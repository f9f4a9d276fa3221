use std::sync::Arc;

use firebase_gateway::config::GatewaySettings;
use firebase_gateway::storage::{
    unauthorized, MemoryObjectStore, ObjectStore, StorageErrorCode, StorageUpload, UploadCategory,
    UploadFile,
};

fn bucket() -> Arc<MemoryObjectStore> {
    Arc::new(MemoryObjectStore::new("demo.appspot.com"))
}

#[test]
fn oversized_image_reports_the_ceiling() {
    let upload = StorageUpload::new(
        bucket(),
        UploadFile::binary(vec![7u8; 2_000_000], "image/png"),
        UploadCategory::Images,
        None,
        Some(1_000_000),
    );
    assert_eq!(upload.error(), Some("File size must not be larger than 1000 Kb"));
    assert!(upload.full_path().is_none());
}

#[test]
fn empty_file_is_rejected() {
    let upload = StorageUpload::new(
        bucket(),
        UploadFile::binary(Vec::new(), "application/pdf"),
        UploadCategory::Documents,
        None,
        None,
    );
    assert!(upload.error().unwrap().starts_with("File size must not be larger than"));
}

#[test]
fn default_ceiling_applies_without_explicit_max() {
    let upload = StorageUpload::new(
        bucket(),
        UploadFile::binary(vec![1u8; 16], "application/pdf"),
        UploadCategory::Documents,
        Some("invoices/2024"),
        None,
    );
    assert_eq!(upload.max_size(), 1_000_000);
    assert_eq!(upload.category(), UploadCategory::Documents);
    let path = upload.full_path().unwrap();
    assert!(path.starts_with("documents/invoices/2024/"));
    assert!(path.ends_with(".pdf"));
}

#[test]
fn configured_ceiling_replaces_the_default() {
    let settings = GatewaySettings {
        default_max_upload_size: 2_000,
        ..GatewaySettings::default()
    };
    let small = StorageUpload::new_with_settings(
        bucket(),
        UploadFile::binary(vec![1u8; 1_500], "image/png"),
        UploadCategory::Images,
        None,
        None,
        &settings,
    );
    assert_eq!(small.max_size(), 2_000);
    assert!(small.error().is_none());

    let large = StorageUpload::new_with_settings(
        bucket(),
        UploadFile::binary(vec![1u8; 2_500], "image/png"),
        UploadCategory::Images,
        None,
        None,
        &settings,
    );
    assert_eq!(large.error(), Some("File size must not be larger than 2 Kb"));

    let explicit = StorageUpload::new_with_settings(
        bucket(),
        UploadFile::binary(vec![1u8; 2_500], "image/png"),
        UploadCategory::Images,
        None,
        Some(5_000),
        &settings,
    );
    assert!(explicit.error().is_none());
}

#[tokio::test]
async fn upload_returns_download_url_and_stores_bytes() {
    let store = bucket();
    let upload = StorageUpload::new(
        store.clone(),
        UploadFile::binary(b"\x89PNG fake".to_vec(), "image/png"),
        UploadCategory::Images,
        Some("avatars"),
        None,
    );
    let path = upload.full_path().unwrap().to_string();

    let url = upload.do_upload().await.unwrap();
    assert_eq!(url, format!("memory://demo.appspot.com/{path}"));
    assert_eq!(store.object(&path).unwrap().as_ref(), b"\x89PNG fake");
    let metadata = store.metadata(&path).unwrap();
    assert_eq!(metadata.content_type.as_deref(), Some("image/png"));
    assert_eq!(metadata.size_bytes(), Some(9));
}

#[tokio::test]
async fn encoded_upload_is_decoded_before_storing() {
    let store = bucket();
    let upload = StorageUpload::new(
        store.clone(),
        UploadFile::encoded("data:image/png;base64,aGVsbG8="),
        UploadCategory::Images,
        None,
        None,
    );
    let path = upload.full_path().unwrap().to_string();
    assert!(path.ends_with(".png"));

    upload.do_upload().await.unwrap();
    assert_eq!(store.object(&path).unwrap().as_ref(), b"hello");
}

#[tokio::test]
async fn rejected_file_never_reaches_the_store() {
    let store = bucket();
    let upload = StorageUpload::new(
        store.clone(),
        UploadFile::binary(vec![1u8; 10], "text/plain"),
        UploadCategory::Images,
        None,
        None,
    );

    let err = upload.do_upload().await.unwrap_err();
    assert_eq!(err.code, StorageErrorCode::InvalidFile);
    assert_eq!(err.message(), "File is not a valid image");
    assert!(store.paths().is_empty());
}

#[tokio::test]
async fn store_failures_are_returned() {
    let store = bucket();
    store.fail_next_put(unauthorized("videos/x.mp4"));
    let upload = StorageUpload::new(
        store.clone(),
        UploadFile::binary(vec![1u8; 10], "video/mp4"),
        UploadCategory::Videos,
        None,
        None,
    );

    let err = upload.do_upload().await.unwrap_err();
    assert_eq!(err.code, StorageErrorCode::Unauthorized);
    assert!(store.paths().is_empty());
}

#[tokio::test]
async fn missing_download_url_is_an_error() {
    let store = bucket();
    store.disable_download_urls();
    let upload = StorageUpload::new(
        store.clone(),
        UploadFile::binary(vec![1u8; 10], "audio/mpeg"),
        UploadCategory::Audios,
        None,
        None,
    );

    let err = upload.do_upload().await.unwrap_err();
    assert_eq!(err.code, StorageErrorCode::NoDownloadUrl);
    assert!(store.contains(upload.full_path().unwrap()));
}

#[tokio::test]
async fn delete_file_removes_the_object() {
    let store = bucket();
    store
        .put("images/a.png", vec![1u8, 2, 3].into(), Some("image/png"))
        .await
        .unwrap();

    StorageUpload::delete_file(store.as_ref(), "images/a.png")
        .await
        .unwrap();
    assert!(!store.contains("images/a.png"));

    let err = StorageUpload::delete_file(store.as_ref(), "images/a.png")
        .await
        .unwrap_err();
    assert_eq!(err.code, StorageErrorCode::ObjectNotFound);
}
