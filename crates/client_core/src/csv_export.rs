use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use shared::domain::Artifact;
use tokio::{fs, io::AsyncWriteExt};
use tracing::info;

use crate::error::{ClientError, ClientResult};

const FALLBACK_STEM: &str = "export";

/// Writes CSV bodies into the download directory without ever replacing an
/// existing file.
#[derive(Debug, Clone)]
pub struct CsvExportEmitter {
    dir: PathBuf,
}

impl CsvExportEmitter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn emit(&self, csv_text: &str, suggested_filename: &str) -> ClientResult<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| ClientError::io(self.dir.display().to_string(), &err))?;

        let file_name = sanitize_filename(suggested_filename);
        let (stem, extension) = file_name
            .rsplit_once('.')
            .unwrap_or((file_name.as_str(), "csv"));

        let mut attempt = 0u32;
        loop {
            let candidate = if attempt == 0 {
                self.dir.join(&file_name)
            } else {
                self.dir.join(format!("{stem}_{attempt}.{extension}"))
            };
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(mut file) => {
                    let path = candidate.display().to_string();
                    file.write_all(csv_text.as_bytes())
                        .await
                        .map_err(|err| ClientError::io(path.clone(), &err))?;
                    file.flush()
                        .await
                        .map_err(|err| ClientError::io(path.clone(), &err))?;
                    info!(path, bytes = csv_text.len(), "csv: written");
                    return Ok(candidate);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(ClientError::io(candidate.display().to_string(), &err)),
            }
        }
    }
}

/// Reduces a suggested name to one safe path component ending in `.csv`.
pub fn sanitize_filename(suggested: &str) -> String {
    let last = suggested
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned = if cleaned.trim_matches(&['_', '.'][..]).is_empty() {
        FALLBACK_STEM
    } else {
        cleaned
    };
    if cleaned.to_ascii_lowercase().ends_with(".csv") {
        cleaned.to_string()
    } else {
        format!("{cleaned}.csv")
    }
}

/// `id,type,uri,created_at`, one row per artifact.
pub fn render_artifact_listing(artifacts: &[Artifact]) -> String {
    let mut out = String::from("id,type,uri,created_at\n");
    for artifact in artifacts {
        let row = [
            artifact.id.as_str(),
            artifact.artifact_type.as_str(),
            artifact.uri.as_str(),
            &artifact.created_at.to_rfc3339(),
        ]
        .iter()
        .map(|field| quote_field(field))
        .collect::<Vec<_>>()
        .join(",");
        out.push_str(&row);
        out.push('\n');
    }
    out
}

fn quote_field(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
#[path = "tests/csv_export_tests.rs"]
mod tests;
