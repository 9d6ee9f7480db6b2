use std::fs;
use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::info;

use super::client::Body;
use super::{data_of, id_text, ApiError, HttpApiClient, HttpMethod, RequestAuth};

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// File transfers the workflows need: temp uploads returning a file id, plus list sheets and signatures.
pub trait FileUploader: Send + Sync {
    fn upload_attachment(&self, path: &Path) -> Result<String, ApiError>;
    fn upload_image(&self, path: &Path) -> Result<String, ApiError>;
    fn upload_list_sheet(
        &self,
        application_id: &str,
        list_code: &str,
        path: &Path,
    ) -> Result<Value, ApiError>;
    fn sign_application(&self, application_id: &str, path: &Path) -> Result<Value, ApiError>;
}

struct LoadedFile {
    name: String,
    mime: String,
    bytes: Vec<u8>,
}

impl LoadedFile {
    fn read(path: &Path, mime_override: Option<&str>) -> Result<Self, ApiError> {
        let bytes = fs::read(path).map_err(|source| ApiError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let mime = mime_override.map(str::to_string).unwrap_or_else(|| {
            mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        Ok(Self { name, mime, bytes })
    }

    fn part(&self) -> Result<Part, ApiError> {
        Part::bytes(self.bytes.clone())
            .file_name(self.name.clone())
            .mime_str(&self.mime)
            .map_err(|err| ApiError::Runtime(format!("invalid mime {}: {err}", self.mime)))
    }
}

impl HttpApiClient {
    fn temp_upload(
        &self,
        kind: &str,
        path: &Path,
        extra: &[(&'static str, &'static str)],
    ) -> Result<String, ApiError> {
        let file = LoadedFile::read(path, None)?;
        let user_id = self.uploader_id()?;
        let url = self.upload_url(&format!("/temp/upload/{kind}"));

        let response = self.send(
            HttpMethod::Post,
            &url,
            &[],
            &RequestAuth::Investor(None),
            || {
                let mut form = Form::new()
                    .text("user_id", user_id.clone())
                    .part("file", file.part()?);
                for (key, value) in extra {
                    form = form.text(*key, *value);
                }
                Ok(Body::Form(form))
            },
        )?;

        let file_id = data_of(&response)
            .get("file_id")
            .and_then(id_text)
            .ok_or_else(|| ApiError::Decode {
                url: url.clone(),
                message: "missing data.file_id".to_string(),
            })?;
        info!(kind, file = %file.name, file_id = %file_id, "uploaded temp file");
        Ok(file_id)
    }

    fn put_file(&self, path_on_base: &str, file: LoadedFile) -> Result<Value, ApiError> {
        let url = self.url_for(path_on_base);
        self.send(
            HttpMethod::Put,
            &url,
            &[],
            &RequestAuth::Investor(None),
            || Ok(Body::Form(Form::new().part("file", file.part()?))),
        )
    }
}

impl FileUploader for HttpApiClient {
    fn upload_attachment(&self, path: &Path) -> Result<String, ApiError> {
        self.temp_upload("attachment", path, &[])
    }

    fn upload_image(&self, path: &Path) -> Result<String, ApiError> {
        self.temp_upload("image", path, &[("is_photo_id", "1")])
    }

    fn upload_list_sheet(
        &self,
        application_id: &str,
        list_code: &str,
        path: &Path,
    ) -> Result<Value, ApiError> {
        let file = LoadedFile::read(path, Some(XLSX_MIME))?;
        info!(application_id, list_code, file = %file.name, "uploading list sheet");
        self.put_file(&format!("/invt/{application_id}/list/{list_code}"), file)
    }

    fn sign_application(&self, application_id: &str, path: &Path) -> Result<Value, ApiError> {
        let file = LoadedFile::read(path, None)?;
        info!(application_id, file = %file.name, "uploading application signature");
        self.put_file(&format!("/invt/{application_id}/application/sign"), file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loaded_file_guesses_mime_from_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("passport.png");
        let mut handle = fs::File::create(&path).expect("create");
        handle.write_all(b"\x89PNG").expect("write");

        let file = LoadedFile::read(&path, None).expect("readable");
        assert_eq!(file.name, "passport.png");
        assert_eq!(file.mime, "image/png");
        assert_eq!(file.bytes, b"\x89PNG");

        let sheet = LoadedFile::read(&path, Some(XLSX_MIME)).expect("readable");
        assert_eq!(sheet.mime, XLSX_MIME);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = LoadedFile::read(Path::new("/nonexistent/face.jpg"), None)
            .err()
            .expect("missing file");
        assert!(err.to_string().contains("/nonexistent/face.jpg"));
    }
}
