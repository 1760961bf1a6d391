//! Archived build artifacts.

use std::path::Path;
use std::sync::Arc;

use cibridge_gateway::{ArtifactInfo, CiGateway};
use serde::Serialize;
use tracing::debug;

use crate::domain::{BridgeError, Result};

/// Bytes of one artifact plus a content-type hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactContent {
    pub path: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl ArtifactContent {
    /// The content as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub struct ArtifactAccessor {
    gateway: Arc<dyn CiGateway>,
}

impl ArtifactAccessor {
    pub fn new(gateway: Arc<dyn CiGateway>) -> Self {
        Self { gateway }
    }

    /// Artifacts archived by a build, in server order.
    pub async fn list(&self, job_name: &str, build_number: u64) -> Result<Vec<ArtifactInfo>> {
        Ok(self.gateway.list_artifacts(job_name, build_number).await?)
    }

    /// Download one artifact. `artifact_path` must be listed for the build.
    pub async fn fetch(
        &self,
        job_name: &str,
        build_number: u64,
        artifact_path: &str,
    ) -> Result<ArtifactContent> {
        let listed = self
            .gateway
            .list_artifact_paths(job_name, build_number)
            .await?;
        if !listed.iter().any(|path| path == artifact_path) {
            return Err(BridgeError::NotFound(format!(
                "artifact '{artifact_path}' of build #{build_number} of job '{job_name}'"
            )));
        }

        let payload = self
            .gateway
            .get_artifact(job_name, build_number, artifact_path)
            .await?;
        debug!(
            job = %job_name,
            build_number,
            path = %artifact_path,
            bytes = payload.bytes.len(),
            "artifact fetched"
        );

        let content_type = payload
            .content_type
            .or_else(|| guess_content_type(artifact_path).map(str::to_string));
        Ok(ArtifactContent {
            path: artifact_path.to_string(),
            bytes: payload.bytes,
            content_type,
        })
    }
}

/// Content type for common artifact file extensions.
pub fn guess_content_type(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "log" | "out" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "tar" => "application/x-tar",
        "jar" | "war" => "application/java-archive",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("reports/junit.xml"), Some("application/xml"));
        assert_eq!(guess_content_type("dist/app.TAR.GZ"), Some("application/gzip"));
        assert_eq!(guess_content_type("build.log"), Some("text/plain"));
        assert_eq!(guess_content_type("Makefile"), None);
        assert_eq!(guess_content_type("bin/tool.exe"), None);
    }

    #[test]
    fn test_as_text() {
        let text = ArtifactContent {
            path: "a.txt".to_string(),
            bytes: b"hello".to_vec(),
            content_type: None,
        };
        assert_eq!(text.as_text(), Some("hello"));

        let binary = ArtifactContent {
            path: "a.bin".to_string(),
            bytes: vec![0xff, 0xfe, 0x00],
            content_type: None,
        };
        assert!(binary.as_text().is_none());
    }
}
