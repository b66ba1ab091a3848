//! Tests for [`Loader::download`]: writing a verified bundle to a directory.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hotbundle::{
    EmbeddedFetcher, Engine, HotbundleError, LoadState, Loader, Manifest, ModuleSource,
    PREBUILT_MANIFEST_FILE_NAME, ScriptError, Sha256Hash,
};

const CORE: &[u8] = b"var core = {};";
const APP: &[u8] = b"start(core);";

struct NullEngine;

impl Engine for NullEngine {
    fn evaluate(&mut self, _bytecode: &[u8], _module_name: &str) -> Result<(), ScriptError> {
        Ok(())
    }

    fn compile(&mut self, source: &str, _file_name: &str) -> Result<Vec<u8>, ScriptError> {
        Ok(source.as_bytes().to_vec())
    }
}

fn hex(body: &[u8]) -> String {
    Sha256Hash::digest(body).to_hex()
}

async fn serve_bundle(server: &MockServer, app_body: &[u8]) {
    Mock::given(method("GET"))
        .and(path("/manifest.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "modules": {
                "core": { "url": "core.js", "sha256": hex(CORE) },
                "app": { "url": "app.js", "sha256": hex(APP), "dependsOnIds": ["core"] }
            }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/core.js"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(CORE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/app.js"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(app_body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn download_writes_modules_and_manifest() {
    let server = MockServer::start().await;
    serve_bundle(&server, APP).await;

    let root = tempfile::tempdir().unwrap();
    let out = root.path().join("bundle");
    let loader = Loader::builder().build().unwrap();

    let result = loader
        .download(&format!("{}/manifest.json", server.uri()), &out)
        .await
        .unwrap();

    assert_eq!(std::fs::read(out.join(hex(CORE))).unwrap(), CORE);
    assert_eq!(std::fs::read(out.join(hex(APP))).unwrap(), APP);
    assert_eq!(result.module_paths, [out.join(hex(CORE)), out.join(hex(APP))]);
    assert_eq!(result.manifest_path, out.join(PREBUILT_MANIFEST_FILE_NAME));

    let written = std::fs::read_to_string(&result.manifest_path).unwrap();
    assert_eq!(Manifest::from_json(&written).unwrap(), result.manifest);
    assert_eq!(loader.state(), LoadState::Done);
}

#[tokio::test]
async fn corrupt_module_means_nothing_is_written() {
    let server = MockServer::start().await;
    serve_bundle(&server, b"start(evil);").await;

    let root = tempfile::tempdir().unwrap();
    let out = root.path().join("bundle");
    let loader = Loader::builder().build().unwrap();

    let err = loader
        .download(&format!("{}/manifest.json", server.uri()), &out)
        .await
        .unwrap_err();

    assert!(matches!(err, HotbundleError::Integrity { ref id, .. } if id == "app"));
    assert!(!out.exists());
    assert_eq!(loader.state(), LoadState::Failed);
}

#[tokio::test]
async fn downloaded_directory_serves_as_embedded_assets() {
    let server = MockServer::start().await;
    serve_bundle(&server, APP).await;
    let url = format!("{}/manifest.json", server.uri());

    let root = tempfile::tempdir().unwrap();
    Loader::builder()
        .build()
        .unwrap()
        .download(&url, root.path())
        .await
        .unwrap();

    let offline = Loader::builder()
        .fetcher(Arc::new(EmbeddedFetcher::new(root.path())))
        .build()
        .unwrap();
    let result = offline.load(&mut NullEngine, &url).await.unwrap();

    assert_eq!(result.order(), ["core", "app"]);
    for module in &result.modules {
        assert_eq!(module.source, ModuleSource::Fetcher("embedded".to_string()));
    }
}
