use std::sync::Arc;
use std::time::Duration;

use firebase_gateway::auth::{AuthError, HttpIdentityProvider, Registration, UserGateway};
use firebase_gateway::config::GatewaySettings;
use firebase_gateway::firestore::store::http::RetrySettings;
use firebase_gateway::firestore::{
    FirestoreErrorCode, HttpDocumentStore, RecordGateway, WhereClause, WhereFilterOp,
};
use firebase_gateway::storage::{
    HttpObjectStore, StorageErrorCode, StorageUpload, UploadCategory, UploadFile,
};
use httpmock::prelude::*;
use serde_json::json;

const DOCUMENTS: &str = "/v1/projects/demo/databases/(default)/documents";

fn records(server: &MockServer) -> RecordGateway {
    let store = HttpDocumentStore::builder("demo")
        .with_endpoint(server.base_url())
        .with_retry_settings(RetrySettings::none())
        .build()
        .unwrap();
    RecordGateway::new("users", Arc::new(store))
}

#[tokio::test]
async fn find_decodes_a_rest_document() {
    let server = MockServer::start_async().await;
    let get = server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{DOCUMENTS}/users/u1"));
            then.status(200).json_body(json!({
                "name": "projects/demo/databases/(default)/documents/users/u1",
                "fields": {
                    "name": { "stringValue": "Ada" },
                    "age": { "integerValue": "36" }
                }
            }));
        })
        .await;

    let record = records(&server).find("u1").await.unwrap().expect("document");

    get.assert_async().await;
    assert_eq!(record.reference, "u1");
    assert_eq!(record.get("name"), Some(&json!("Ada")));
    assert_eq!(record.get("age"), Some(&json!(36)));
}

#[tokio::test]
async fn missing_document_is_none() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{DOCUMENTS}/users/ghost"));
            then.status(404).json_body(json!({
                "error": { "code": 404, "status": "NOT_FOUND", "message": "missing" }
            }));
        })
        .await;

    assert!(records(&server).find("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn count_reads_the_aggregation_result() {
    let server = MockServer::start_async().await;
    let aggregate = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{DOCUMENTS}:runAggregationQuery"))
                .body_contains("\"status\"");
            then.status(200).json_body(json!([{
                "result": { "aggregateFields": { "count": { "integerValue": "3" } } }
            }]));
        })
        .await;

    let count = records(&server)
        .count_data(&[WhereClause::new("status", WhereFilterOp::Equal, "active")])
        .await
        .unwrap();

    aggregate.assert_async().await;
    assert_eq!(count, 3);
}

#[tokio::test]
async fn save_commits_one_write() {
    let server = MockServer::start_async().await;
    let commit = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{DOCUMENTS}:commit"))
                .body_contains("documents/users/u1")
                .body_contains("\"stringValue\":\"Ada\"");
            then.status(200).json_body(json!({ "writeResults": [{}] }));
        })
        .await;

    let id = records(&server)
        .save(json!({ "name": "Ada", "reference": "dropped" }), Some("u1"))
        .await
        .unwrap();

    commit.assert_async().await;
    assert_eq!(id, "u1");
}

#[tokio::test]
async fn commit_rejection_keeps_the_server_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(format!("{DOCUMENTS}:commit"));
            then.status(403).json_body(json!({
                "error": {
                    "code": 403,
                    "status": "PERMISSION_DENIED",
                    "message": "Missing or insufficient permissions."
                }
            }));
        })
        .await;

    let err = records(&server)
        .delete_batch(&["u1".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.code, FirestoreErrorCode::PermissionDenied);
    assert!(err.message().starts_with("delete_batch: "));
}

#[tokio::test]
async fn upload_to_rest_storage_returns_tokenized_url() {
    let server = MockServer::start_async().await;
    let upload = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v0/b/demo.appspot.com/o")
                .query_param("uploadType", "multipart")
                .header("Authorization", "Firebase user-token")
                .body_contains("Content-Type: image/png");
            then.status(200).json_body(json!({
                "bucket": "demo.appspot.com",
                "name": "images/avatar.png",
                "size": "4",
                "contentType": "image/png"
            }));
        })
        .await;
    let metadata = server
        .mock_async(|when, then| {
            when.method(GET).path_contains("/v0/b/demo.appspot.com/o/images");
            then.status(200).json_body(json!({
                "name": "images/avatar.png",
                "downloadTokens": "tok-1,tok-2"
            }));
        })
        .await;

    let store = HttpObjectStore::new(server.base_url(), "demo.appspot.com")
        .unwrap()
        .with_auth_token("user-token")
        .with_retry_delay(Duration::from_millis(1));
    let storage_upload = StorageUpload::new(
        Arc::new(store),
        UploadFile::binary(b"\x89PNG".to_vec(), "image/png"),
        UploadCategory::Images,
        None,
        None,
    );

    let url = storage_upload.do_upload().await.unwrap();

    upload.assert_async().await;
    metadata.assert_async().await;
    let expected_prefix = format!("{}/v0/b/demo.appspot.com/o/images%2F", server.base_url());
    assert!(url.starts_with(&expected_prefix), "unexpected url {url}");
    assert!(url.ends_with("?alt=media&token=tok-1"));
}

#[tokio::test]
async fn forbidden_upload_is_unauthorized() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v0/b/demo.appspot.com/o");
            then.status(403).body("{\"error\":{\"code\":403}}");
        })
        .await;

    let store = HttpObjectStore::new(server.base_url(), "demo.appspot.com").unwrap();
    let storage_upload = StorageUpload::new(
        Arc::new(store),
        UploadFile::binary(vec![1u8; 8], "application/pdf"),
        UploadCategory::Documents,
        Some("contracts"),
        None,
    );

    let err = storage_upload.do_upload().await.unwrap_err();
    assert_eq!(err.code, StorageErrorCode::Unauthorized);
    assert_eq!(err.status, Some(403));
}

#[tokio::test]
async fn registration_over_identity_toolkit() {
    let server = MockServer::start_async().await;
    let sign_up = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/accounts:signUp")
                .query_param("key", "api-key");
            then.status(200).json_body(json!({
                "localId": "uid-7",
                "idToken": "id-7",
                "refreshToken": "refresh-7"
            }));
        })
        .await;
    let lookup = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/accounts:lookup");
            then.status(200).json_body(json!({
                "users": [{ "localId": "uid-7", "email": "ada@example.com" }]
            }));
        })
        .await;
    let verification = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/accounts:sendOobCode")
                .json_body(json!({ "requestType": "VERIFY_EMAIL", "idToken": "id-7" }));
            then.status(200).json_body(json!({ "email": "ada@example.com" }));
        })
        .await;

    let provider = HttpIdentityProvider::new("api-key")
        .unwrap()
        .with_endpoint(server.base_url());
    let users = UserGateway::new(Arc::new(provider), None);

    let credential = users
        .register_with_email_and_password(Registration::new("ada@example.com", "analytical"))
        .await
        .unwrap();

    sign_up.assert_async().await;
    lookup.assert_async().await;
    verification.assert_async().await;
    assert_eq!(credential.user.uid, "uid-7");
    assert_eq!(users.is_logged_in().map(|user| user.uid), Some("uid-7".into()));
}

#[tokio::test]
async fn failed_verification_deletes_the_new_identity() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/accounts:signUp");
            then.status(200).json_body(json!({ "localId": "uid-8", "idToken": "id-8" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/accounts:lookup");
            then.status(200).json_body(json!({
                "users": [{ "localId": "uid-8", "email": "bob@example.com" }]
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/accounts:sendOobCode");
            then.status(400).json_body(json!({
                "error": { "code": 400, "message": "TOO_MANY_ATTEMPTS_TRY_LATER" }
            }));
        })
        .await;
    let delete = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/accounts:delete")
                .json_body(json!({ "idToken": "id-8" }));
            then.status(200).json_body(json!({}));
        })
        .await;

    let provider = HttpIdentityProvider::new("api-key")
        .unwrap()
        .with_endpoint(server.base_url());
    let users = UserGateway::new(Arc::new(provider), None);

    let err = users
        .register_with_email_and_password(Registration::new("bob@example.com", "builder"))
        .await
        .unwrap_err();

    delete.assert_async().await;
    assert_eq!(err.code(), "auth/too-many-requests");
}

fn short_timeout() -> GatewaySettings {
    GatewaySettings {
        request_timeout: Duration::from_millis(100),
        ..GatewaySettings::default()
    }
}

#[tokio::test]
async fn storage_requests_use_the_configured_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path_contains("/v0/b/demo.appspot.com/o/");
            then.status(204).delay(Duration::from_secs(2));
        })
        .await;

    let store = HttpObjectStore::new(server.base_url(), "demo.appspot.com")
        .unwrap()
        .with_settings(&short_timeout());
    let err = firebase_gateway::storage::ObjectStore::delete(&store, "images/slow.png")
        .await
        .unwrap_err();
    assert_eq!(err.code, StorageErrorCode::InternalError);
}

#[tokio::test]
async fn identity_requests_use_the_configured_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/accounts:signUp");
            then.status(200)
                .delay(Duration::from_secs(2))
                .json_body(json!({ "localId": "uid-9", "idToken": "id-9" }));
        })
        .await;

    let provider = HttpIdentityProvider::new("api-key")
        .unwrap()
        .with_endpoint(server.base_url())
        .with_settings(&short_timeout());
    let users = UserGateway::new(Arc::new(provider), None);

    let err = users
        .register_with_email_and_password(Registration::new("slow@example.com", "patience"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Network(_)));
}
