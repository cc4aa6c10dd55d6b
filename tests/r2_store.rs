use gallery_uploader::intake::FileContent;
use gallery_uploader::store::{ObjectStore, ProgressCallback, R2Config, R2Store, StoreError};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> R2Config {
    R2Config {
        account_id: "acct".to_string(),
        bucket: "wedding".to_string(),
        access_key_id: "key".to_string(),
        secret_access_key: "secret".to_string(),
        endpoint_url: Some(server.uri()),
    }
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<(u64, u64)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback = Arc::new(move |sent: u64, total: u64| {
        sink.lock().unwrap().push((sent, total));
    });
    (callback, seen)
}

#[tokio::test]
async fn small_body_uses_single_put() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/wedding/images/t-a.jpg"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"abc\""))
        .expect(1)
        .mount(&server)
        .await;

    let store = R2Store::new(&config(&server));
    let (progress, seen) = recorder();

    store
        .put_resumable("images/t-a.jpg", FileContent::from(vec![5u8; 10]), "image/jpeg", progress)
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(10, 10)]);
}

#[tokio::test]
async fn rejected_put_reports_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string(
            "<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
        ))
        .mount(&server)
        .await;

    let store = R2Store::new(&config(&server));
    let (progress, seen) = recorder();

    let err = store
        .put_resumable("images/t-a.jpg", FileContent::from(b"jpg".to_vec()), "image/jpeg", progress)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Request(ref msg) if msg.starts_with("Upload request failed")));
    assert!(seen.lock().unwrap().is_empty());
}

async fn mount_multipart(server: &MockServer, key: &str, parts: u64) {
    let object = format!("/wedding/{}", key);
    Mock::given(method("POST"))
        .and(path(object.as_str()))
        .and(query_param("uploads", ""))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <InitiateMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Bucket>wedding</Bucket><Key>{}</Key><UploadId>upload-1</UploadId>\
             </InitiateMultipartUploadResult>",
            key
        )))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path(object.as_str()))
        .and(query_param("uploadId", "upload-1"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"part\""))
        .expect(parts)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(object.as_str()))
        .and(query_param("uploadId", "upload-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <CompleteMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Bucket>wedding</Bucket><Key>{}</Key><ETag>\"final\"</ETag>\
             </CompleteMultipartUploadResult>",
            key
        )))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn large_body_uses_multipart_upload() {
    let server = MockServer::start().await;
    mount_multipart(&server, "videos/t-b.mp4", 3).await;

    let store = R2Store::new(&config(&server)).with_multipart(8, 4, 2);
    let (progress, seen) = recorder();

    store
        .put_resumable("videos/t-b.mp4", FileContent::from(vec![1u8; 10]), "video/mp4", progress)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(_, total)| *total == 10));
    assert_eq!(seen.iter().map(|(sent, _)| *sent).max(), Some(10));
}

#[tokio::test]
async fn disk_backed_body_is_read_part_by_part() {
    let server = MockServer::start().await;
    mount_multipart(&server, "videos/t-dance.mp4", 3).await;

    let source = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(source.path(), b"first dance").unwrap();
    let body = FileContent::Disk {
        path: source.path().to_path_buf(),
        len: 11,
    };

    let store = R2Store::new(&config(&server)).with_multipart(8, 4, 2);
    let (progress, seen) = recorder();
    store
        .put_resumable("videos/t-dance.mp4", body, "video/mp4", progress)
        .await
        .unwrap();

    assert_eq!(seen.lock().unwrap().iter().map(|(sent, _)| *sent).max(), Some(11));
}

#[tokio::test]
async fn missing_disk_body_fails_before_any_request() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let body = FileContent::Disk {
        path: dir.path().join("gone.jpg"),
        len: 3,
    };

    let store = R2Store::new(&config(&server));
    let (progress, _seen) = recorder();
    let err = store
        .put_resumable("images/t-gone.jpg", body, "image/jpeg", progress)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Body(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}
