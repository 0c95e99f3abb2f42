use crate::error::IngestError;
use crate::models::RawDocument;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawDocument>, IngestError>;
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Recursive local-folder source, mostly useful for backfills and tests.
pub struct FolderSource {
    folder: PathBuf,
}

impl FolderSource {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

#[async_trait]
impl DocumentSource for FolderSource {
    async fn fetch(&self) -> Result<Vec<RawDocument>, IngestError> {
        let mut documents = Vec::new();

        for path in discover_pdf_files(&self.folder) {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
                })?
                .to_string();

            let bytes = tokio::fs::read(&path).await?;
            documents.push(RawDocument::pdf(name, bytes));
        }

        Ok(documents)
    }
}

/// Drive API source: resolves the site and its default drive, lists one
/// level of year folders under the configured path, and downloads every file
/// that exposes a download link. Token acquisition is the caller's problem.
pub struct DriveSource {
    client: Client,
    endpoint: String,
    site_host: String,
    site_name: String,
    folder_path: String,
    access_token: String,
}

impl DriveSource {
    pub fn new(
        site_host: impl Into<String>,
        site_name: impl Into<String>,
        folder_path: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: "https://graph.microsoft.com/v1.0".to_string(),
            site_host: site_host.into(),
            site_name: site_name.into(),
            folder_path: folder_path.into(),
            access_token: access_token.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn get_json(&self, url: &str) -> Result<Value, IngestError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::Source(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn drive_id(&self) -> Result<String, IngestError> {
        let site = self
            .get_json(&format!(
                "{}/sites/{}:/sites/{}",
                self.endpoint, self.site_host, self.site_name
            ))
            .await?;
        let site_id = site
            .pointer("/id")
            .and_then(Value::as_str)
            .ok_or_else(|| IngestError::Source("site response had no id".to_string()))?;

        let drive = self
            .get_json(&format!("{}/sites/{}/drive", self.endpoint, site_id))
            .await?;
        drive
            .pointer("/id")
            .and_then(Value::as_str)
            .map(|id| id.to_string())
            .ok_or_else(|| IngestError::Source("drive response had no id".to_string()))
    }

    async fn list_children(&self, drive_id: &str, path: &str) -> Result<Vec<Value>, IngestError> {
        let listing = self
            .get_json(&format!(
                "{}/drives/{}/root:/{}:/children",
                self.endpoint, drive_id, path
            ))
            .await?;
        Ok(listing
            .pointer("/value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, IngestError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(IngestError::Source(format!(
                "download returned {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl DocumentSource for DriveSource {
    async fn fetch(&self) -> Result<Vec<RawDocument>, IngestError> {
        let drive_id = self.drive_id().await?;

        let items = self.list_children(&drive_id, &self.folder_path).await?;
        let folders: Vec<String> = items
            .iter()
            .filter(|item| item.get("folder").is_some())
            .filter_map(|item| item.pointer("/name").and_then(Value::as_str))
            .map(|name| name.to_string())
            .collect();

        let mut documents = Vec::new();
        for folder_name in folders {
            let path = format!("{}/{}", self.folder_path, folder_name);
            for file in self.list_children(&drive_id, &path).await? {
                if file.get("folder").is_some() {
                    continue;
                }

                let name = file
                    .pointer("/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                let Some(download_url) = file
                    .pointer("/@microsoft.graph.downloadUrl")
                    .and_then(Value::as_str)
                else {
                    warn!(file = %name, folder = %folder_name, "file has no download link, skipping");
                    continue;
                };

                let bytes = self.download(download_url).await?;
                documents.push(RawDocument::pdf(name, bytes));
            }
        }

        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discover_pdf_files_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("2024");
        fs::create_dir(&nested)?;

        File::create(base.join("b.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("a.pdf"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt")).and_then(|mut file| file.write_all(b"skip me"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn folder_source_reads_bytes_and_names() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("jan.pdf"), b"%PDF-1.4\n%fake")?;

        let source = FolderSource::new(dir.path());
        let documents = source.fetch().await?;

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].name, "jan.pdf");
        assert_eq!(documents[0].media_type, "application/pdf");
        assert!(!documents[0].bytes.is_empty());
        Ok(())
    }
}
