use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::handlers::{convert, files, folders, health};
use crate::AppState;

/// Build the application router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/folders", get(folders::list_root))
        .route(
            "/folders/*path",
            get(folders::list_folder)
                .post(folders::create_folder)
                .delete(folders::delete_folder),
        )
        .route(
            "/files/*path",
            get(files::get_file)
                .post(files::upload_files)
                .delete(files::delete_file),
        )
        .route("/convert", post(convert::convert))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&server.cors_allowed_origins))
                .layer(DefaultBodyLimit::max(server.max_request_bytes())),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(allowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::{MemoryStore, ObjectStore};
    use crate::utils::archive::fixtures::zip_with;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "gateway-test-boundary";

    #[derive(Default)]
    struct MultipartBody {
        body: Vec<u8>,
    }

    impl MultipartBody {
        fn file(mut self, field: &str, filename: &str, data: &[u8]) -> Self {
            self.body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, field, filename
                )
                .as_bytes(),
            );
            self.body.extend_from_slice(data);
            self.body.extend_from_slice(b"\r\n");
            self
        }

        fn text(mut self, field: &str, value: &str) -> Self {
            self.body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, field, value
                )
                .as_bytes(),
            );
            self
        }

        fn into_request(mut self, uri: &str) -> Request<Body> {
            self.body
                .extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(self.body))
                .unwrap()
        }
    }

    fn app_with(store: Arc<MemoryStore>, config: Config) -> Router {
        let state = AppState::new(store as Arc<dyn ObjectStore>, &config);
        create_router(state, &config.server)
    }

    fn app(store: Arc<MemoryStore>) -> Router {
        app_with(store, Config::default())
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::with_page_size("scans", 2));
        store.insert_sized("scans/", 0).await;
        store.insert_sized("scans/a.laz", 1024).await;
        store.insert_sized("scans/b.laz", 512).await;
        store.insert_sized("scans/2024/c.laz", 2048).await;
        store.insert_sized("scans/2024/june/d.laz", 1024).await;
        store
    }

    #[tokio::test]
    async fn test_list_one_level() {
        let store = seeded_store().await;
        let response = app(store)
            .oneshot(request(Method::GET, "/folders/scans"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(
            body,
            json!({
                "files": [
                    {
                        "file": "scans/a.laz",
                        "size": "1 KB",
                        "signedUrl": "memory://scans/scans/a.laz?X-Amz-Expires=300"
                    },
                    {
                        "file": "scans/b.laz",
                        "size": "512 Bytes",
                        "signedUrl": "memory://scans/scans/b.laz?X-Amz-Expires=300"
                    }
                ],
                "folders": ["scans/2024/"],
                "totalSize": "1.5 KB",
                "totalBytes": 1536
            })
        );
    }

    #[tokio::test]
    async fn test_list_recursive() {
        let store = seeded_store().await;
        let response = app(store)
            .oneshot(request(Method::GET, "/folders/scans?recursive=true"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let mut files: Vec<&str> = body["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["file"].as_str().unwrap())
            .collect();
        files.sort();

        assert_eq!(
            files,
            vec![
                "scans/2024/c.laz",
                "scans/2024/june/d.laz",
                "scans/a.laz",
                "scans/b.laz"
            ]
        );
        assert_eq!(body["folders"], json!(["scans/2024/", "scans/2024/june/"]));
        assert_eq!(body["totalBytes"], json!(4608));
        assert_eq!(body["totalSize"], json!("4.5 KB"));
    }

    #[tokio::test]
    async fn test_listing_budget_is_a_client_error() {
        let store = seeded_store().await;
        let mut config = Config::default();
        config.listing.max_depth = 1;

        let response = app_with(store, config)
            .oneshot(request(Method::GET, "/folders/scans?recursive=true"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_folder_writes_placeholder() {
        let store = Arc::new(MemoryStore::new("scans"));
        let response = app(store.clone())
            .oneshot(request(Method::POST, "/folders/projects/site-a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.keys().await, vec!["projects/site-a/".to_string()]);
        assert_eq!(store.get("projects/site-a/").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_delete_empty_folder_is_not_found() {
        let store = Arc::new(MemoryStore::new("scans"));
        store.insert_sized("other/a.laz", 10).await;

        let response = app(store.clone())
            .oneshot(request(Method::DELETE, "/folders/missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "Folder is empty or does not exist." })
        );
        assert_eq!(store.delete_batches(), 0);
    }

    #[tokio::test]
    async fn test_delete_folder_in_one_batch() {
        let store = Arc::new(MemoryStore::with_page_size("scans", 3));
        for i in 0..7 {
            store.insert_sized(&format!("doomed/part-{}.bin", i), 1).await;
        }
        store.insert_sized("doomed/nested/deep.bin", 1).await;
        store.insert_sized("kept/a.bin", 1).await;

        let response = app(store.clone())
            .oneshot(request(Method::DELETE, "/folders/doomed"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["deleted"], json!(8));
        assert_eq!(store.delete_batches(), 1);
        assert_eq!(store.keys().await, vec!["kept/a.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_get_file() {
        let store = Arc::new(MemoryStore::new("scans"));
        store.insert_sized("scans/a.laz", 1536).await;

        let response = app(store.clone())
            .oneshot(request(Method::GET, "/files/scans/a.laz"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "url": "memory://scans/scans/a.laz?X-Amz-Expires=300",
                "size": "1.5 KB",
                "contentType": "application/octet-stream"
            })
        );

        let response = app(store)
            .oneshot(request(Method::GET, "/files/scans/missing.laz"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_files_with_content_types() {
        let store = Arc::new(MemoryStore::new("scans"));
        let request = MultipartBody::default()
            .file("files", "index.html", b"<html></html>")
            .file("files", "cloud.laz", b"LASF")
            .text("note", "ignored")
            .into_request("/files/site");

        let response = app(store.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["uploaded"], json!(2));
        assert_eq!(body["files"][0]["status"], json!("uploaded"));
        assert_eq!(
            store.content_type("site/index.html").await.as_deref(),
            Some("text/html")
        );
        assert_eq!(
            store.content_type("site/cloud.laz").await.as_deref(),
            Some("application/octet-stream")
        );
    }

    #[tokio::test]
    async fn test_upload_zip_extracts_entries() {
        let store = Arc::new(MemoryStore::new("scans"));
        let archive = zip_with(&[
            ("Palac/", ""),
            ("Palac/index.html", "<html></html>"),
            ("Palac/libs/", ""),
            ("Palac/libs/potree.js", "var potree;"),
            ("Palac/metadata.json", "{}"),
        ]);
        let request = MultipartBody::default()
            .file("file", "bundle.zip", &archive)
            .into_request("/files/pages");

        let response = app(store.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["uploaded"], json!(3));
        assert_eq!(body["failed"], json!(0));
        assert_eq!(
            store.keys().await,
            vec![
                "pages/Palac/index.html".to_string(),
                "pages/Palac/libs/potree.js".to_string(),
                "pages/Palac/metadata.json".to_string(),
            ]
        );
        assert_eq!(
            store.content_type("pages/Palac/libs/potree.js").await.as_deref(),
            Some("application/javascript")
        );
    }

    #[tokio::test]
    async fn test_upload_zip_without_extraction() {
        let store = Arc::new(MemoryStore::new("scans"));
        let archive = zip_with(&[("a.txt", "a")]);
        let request = MultipartBody::default()
            .file("file", "bundle.zip", &archive)
            .into_request("/files/raw?extract=false");

        let response = app(store.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.keys().await, vec!["raw/bundle.zip".to_string()]);
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let store = Arc::new(MemoryStore::new("scans"));
        let request = MultipartBody::default()
            .text("note", "no file here")
            .into_request("/files/site");

        let response = app(store.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({ "error": "No file uploaded." }));
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_upload_too_many_files_is_rejected() {
        let store = Arc::new(MemoryStore::new("scans"));
        let mut config = Config::default();
        config.storage.max_upload_files = 2;

        let request = MultipartBody::default()
            .file("files", "a.txt", b"a")
            .file("files", "b.txt", b"b")
            .file("files", "c.txt", b"c")
            .into_request("/files/site");

        let response = app_with(store.clone(), config).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_upload_over_body_limit_is_rejected() {
        let store = Arc::new(MemoryStore::new("scans"));
        let mut config = Config::default();
        config.server.max_request_size_mb = 1;

        let large = vec![b'x'; 2 * 1024 * 1024];
        let request = MultipartBody::default()
            .file("files", "large.laz", &large)
            .into_request("/files/site");

        let response = app_with(store.clone(), config).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_file() {
        let store = Arc::new(MemoryStore::new("scans"));
        store.insert_sized("scans/a.laz", 10).await;

        let response = app(store.clone())
            .oneshot(request(Method::DELETE, "/files/scans/a.laz"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(Arc::new(MemoryStore::new("scans")))
            .oneshot(request(Method::GET, "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["runningConversions"], json!(0));
    }

    #[tokio::test]
    async fn test_convert_requires_file() {
        let request = MultipartBody::default()
            .text("pageName", "Palac")
            .into_request("/convert");

        let response = app(Arc::new(MemoryStore::new("scans")))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    fn shell_converter_config(dir: &std::path::Path) -> Config {
        // `sh <input> -o <output> --generate-page <page>` runs the upload as a script
        let mut config = Config::default();
        config.converter.executable_path = "sh".into();
        config.converter.work_dir = dir.join("work");
        config.converter.output_dir = dir.join("out");
        config
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_publishes_generated_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = shell_converter_config(dir.path());
        config.converter.upload_prefix = Some("converted".to_string());

        let store = Arc::new(MemoryStore::new("scans"));
        let script = b"mkdir -p \"$2\" && echo '<html></html>' > \"$2/$4.html\"";
        let request = MultipartBody::default()
            .file("file", "Palac Moszna.laz", script)
            .into_request("/convert");

        let response = app_with(store.clone(), config).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["message"], json!("Conversion completed successfully."));
        assert_eq!(body["pageName"], json!("Palac_Moszna"));
        assert_eq!(body["outcome"], json!({ "status": "succeeded" }));
        assert_eq!(body["publishedObjects"], json!(1));
        assert_eq!(
            store.keys().await,
            vec!["converted/Palac_Moszna/Palac_Moszna.html".to_string()]
        );

        // Published output is not kept locally
        let leftover = std::fs::read_dir(dir.path().join("out")).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_failure_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = shell_converter_config(dir.path());

        let request = MultipartBody::default()
            .file("file", "broken.laz", b"exit 137")
            .text("pageName", "broken")
            .into_request("/convert");

        let response = app_with(Arc::new(MemoryStore::new("scans")), config)
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await, json!({ "message": "Conversion failed." }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_convert_rejects_when_saturated() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = shell_converter_config(dir.path());
        config.converter.max_concurrent = 1;
        config.converter.queue_capacity = 0;

        let state = AppState::new(Arc::new(MemoryStore::new("scans")), &config);
        let pool = state.pool.clone();
        let router = create_router(state, &config.server);

        let busy = router.clone();
        let first = tokio::spawn(async move {
            let request = MultipartBody::default()
                .file("file", "slow.laz", b"sleep 1")
                .into_request("/convert");
            busy.oneshot(request).await.unwrap().status()
        });

        while pool.available_capacity() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let request = MultipartBody::default()
            .file("file", "second.laz", b"exit 0")
            .into_request("/convert");
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(first.await.unwrap(), StatusCode::OK);
    }
}
