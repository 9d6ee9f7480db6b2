#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use qip_autofill::api::{ApiError, ApiRequest, FileUploader, HttpMethod, RemoteApi};
use qip_autofill::auth::{AuthError, StageUser, UserAuthenticator};
use qip_autofill::config::ApiConfig;
use qip_autofill::workflows::schema::{
    FieldValueResolver, MediaLibrary, OptionCatalog, OverrideRegistry, ValueResolver,
};
use qip_autofill::workflows::steps::{ApplicantIdentityResolver, StepSubmitter};
use serde_json::{json, Value};

/// Serves canned JSON keyed by `"METHOD /path"` (plus `?object_id=` when present) and records
/// every request. Queued responses are consumed in order; the last one repeats.
#[derive(Default)]
pub struct FakeApi {
    routes: Mutex<HashMap<String, VecDeque<Result<Value, u16>>>>,
    calls: Mutex<Vec<ApiRequest>>,
}

fn route_key(method: HttpMethod, path: &str) -> String {
    format!("{method} {path}")
}

fn request_key(request: &ApiRequest) -> String {
    match request.query_value("object_id") {
        Some(object_id) => format!("{}?object_id={object_id}", route_key(request.method, &request.path)),
        None => route_key(request.method, &request.path),
    }
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: HttpMethod, path: &str, body: Value) -> &Self {
        self.push(route_key(method, path), Ok(body));
        self
    }

    pub fn fail(&self, method: HttpMethod, path: &str, status: u16) -> &Self {
        self.push(route_key(method, path), Err(status));
        self
    }

    fn push(&self, key: String, response: Result<Value, u16>) {
        self.routes
            .lock()
            .expect("routes lock")
            .entry(key)
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_to(&self, method: HttpMethod, path: &str) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method && call.path == path)
            .collect()
    }

    pub fn last_body(&self, method: HttpMethod, path: &str) -> Value {
        self.calls_to(method, path)
            .pop()
            .and_then(|call| call.body)
            .unwrap_or(Value::Null)
    }
}

impl RemoteApi for FakeApi {
    fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let key = request_key(&request);
        self.calls.lock().expect("calls lock").push(request.clone());

        let mut routes = self.routes.lock().expect("routes lock");
        let response = routes.get_mut(&key).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });

        match response {
            Some(Ok(body)) => Ok(body),
            Some(Err(status)) => Err(ApiError::Status {
                method: request.method,
                url: request.path,
                status,
                body: String::new(),
            }),
            None => Err(ApiError::Status {
                method: request.method,
                url: request.path,
                status: 404,
                body: format!("no route for {key}"),
            }),
        }
    }
}

#[derive(Default)]
pub struct FakeUploader {
    pub uploads: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeUploader {
    fn record(&self, kind: &str, path: &Path) -> usize {
        let mut uploads = self.uploads.lock().expect("uploads lock");
        uploads.push((kind.to_string(), path.to_path_buf()));
        uploads.len()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.uploads
            .lock()
            .expect("uploads lock")
            .iter()
            .map(|(kind, _)| kind.clone())
            .collect()
    }
}

impl FileUploader for FakeUploader {
    fn upload_attachment(&self, path: &Path) -> Result<String, ApiError> {
        Ok(format!("file-{}", self.record("attachment", path)))
    }

    fn upload_image(&self, path: &Path) -> Result<String, ApiError> {
        Ok(format!("image-{}", self.record("image", path)))
    }

    fn upload_list_sheet(
        &self,
        application_id: &str,
        list_code: &str,
        path: &Path,
    ) -> Result<Value, ApiError> {
        self.record(&format!("list:{list_code}"), path);
        Ok(json!({"application_id": application_id, "list": list_code}))
    }

    fn sign_application(&self, application_id: &str, path: &Path) -> Result<Value, ApiError> {
        self.record("signature", path);
        Ok(json!({"signed": application_id}))
    }
}

/// Hands out `token-<phone>` and remembers who asked.
#[derive(Default)]
pub struct FakeAuthenticator {
    pub logins: Mutex<Vec<String>>,
}

impl UserAuthenticator for FakeAuthenticator {
    fn bearer_for(&self, user: &StageUser) -> Result<String, AuthError> {
        self.logins
            .lock()
            .expect("logins lock")
            .push(user.identity.clone());
        Ok(format!("token-{}", user.identity))
    }
}

pub fn api_config() -> ApiConfig {
    ApiConfig {
        base_url: "http://portal.test/api/v1".to_string(),
        upload_base_url: "http://upload.test".to_string(),
        step_list_url: "http://portal.test/api/v2/step".to_string(),
        project_type: "qip".to_string(),
        timeout: std::time::Duration::from_secs(5),
    }
}

/// Media root with one image in every folder.
pub fn media_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for folder in ["", "face_scan", "signature"] {
        let path = dir.path().join(folder);
        std::fs::create_dir_all(&path).expect("media folder");
        std::fs::write(path.join("sample.png"), b"png").expect("media file");
    }
    dir
}

pub fn resolver(api: Arc<FakeApi>, uploader: Arc<FakeUploader>, media: &Path) -> Arc<dyn ValueResolver> {
    Arc::new(
        FieldValueResolver::new(
            Arc::new(OptionCatalog::new(api)),
            uploader,
            MediaLibrary::new(media, media.join("samples")),
            Arc::new(OverrideRegistry::empty()),
        )
        .with_seed(7),
    )
}

pub struct StepFixture {
    pub api: Arc<FakeApi>,
    pub uploader: Arc<FakeUploader>,
    pub applicants: Arc<ApplicantIdentityResolver>,
    pub submitter: StepSubmitter,
    pub media: tempfile::TempDir,
}

pub fn step_fixture() -> StepFixture {
    let api = FakeApi::new();
    let uploader = Arc::new(FakeUploader::default());
    let media = media_root();
    let resolver = resolver(api.clone(), uploader.clone(), media.path());
    let applicants = Arc::new(ApplicantIdentityResolver::new(api.clone(), resolver.clone()));
    let submitter = StepSubmitter::new(api.clone(), resolver, applicants.clone(), &api_config());
    StepFixture {
        api,
        uploader,
        applicants,
        submitter,
        media,
    }
}

/// `data.detail` envelope with one form panel holding `fields`.
pub fn form_detail(fields: Value) -> Value {
    json!({"data": {"detail": {
        "forms": [{"code": "main", "panels": [{"field_groups": [{"fields": fields}]}]}]
    }}})
}

/// `data.detail` envelope with top-level panels only, as sub-form schemas are served.
pub fn panel_detail(fields: Value) -> Value {
    json!({"data": {"detail": {"panels": [{"field_groups": [{"fields": fields}]}]}}})
}

/// Codes of a saved payload body.
pub fn saved_codes(body: &Value) -> Vec<String> {
    body["data"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry["field_code"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn saved_value<'a>(body: &'a Value, code: &str) -> &'a Value {
    body["data"]
        .as_array()
        .and_then(|entries| entries.iter().find(|entry| entry["field_code"] == code))
        .map(|entry| &entry["value"])
        .unwrap_or(&Value::Null)
}
