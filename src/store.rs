// src/store.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STORE_FILE: &str = "processed-files.json";

/// Metadados gravados junto da marca de processado. Os nomes de campo seguem
/// o formato que o restante da automação da comunidade já consome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<String>,
    pub youtube_id: String,
    pub youtube_url: String,
}

/// Livro-razão em arquivo dos vídeos já processados. Escrita
/// read-modify-write sem lock de arquivo; um processo só.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(STORE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_file(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("criando diretório {}", dir.display()))?;
        }
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        tokio::fs::write(&self.path, b"{}")
            .await
            .with_context(|| format!("inicializando {}", self.path.display()))?;
        Ok(())
    }

    async fn read_map(&self) -> Result<BTreeMap<String, Value>> {
        self.ensure_file().await?;
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("lendo {}", self.path.display()))?;
        let map = serde_json::from_slice(&bytes)
            .with_context(|| format!("desserializando {}", self.path.display()))?;
        Ok(map)
    }

    async fn write_map(&self, map: &BTreeMap<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(map).context("serializando livro-razão")?;
        tokio::fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("gravando {}", self.path.display()))?;
        Ok(())
    }

    /// Erros de leitura contam como "não processado" para nunca travar o
    /// pipeline por causa de um arquivo local ruim.
    pub async fn is_processed(&self, file_id: &str) -> bool {
        match self.read_map().await {
            Ok(map) => map.contains_key(file_id),
            Err(e) => {
                tracing::warn!(error = ?e, "falha lendo livro-razão; tratando como não processado");
                false
            }
        }
    }

    pub async fn mark_processed(&self, file_id: &str, meta: &ProcessedMeta) -> Result<()> {
        let mut map = self.read_map().await?;
        let mut entry = serde_json::to_value(meta).context("serializando metadados")?;
        if let Value::Object(obj) = &mut entry {
            obj.insert(
                "processedAt".to_string(),
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        map.insert(file_id.to_string(), entry);
        self.write_map(&map).await
    }

    pub async fn all(&self) -> Result<BTreeMap<String, Value>> {
        self.read_map().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> ProcessedMeta {
        ProcessedMeta {
            folder_name: Some("Aulas".to_string()),
            file_name: name.to_string(),
            created_time: None,
            file_size: Some("1024".to_string()),
            youtube_id: "yt123".to_string(),
            youtube_url: "https://www.youtube.com/watch?v=yt123".to_string(),
        }
    }

    #[tokio::test]
    async fn mark_then_check_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert!(!store.is_processed("abc").await);
        store.mark_processed("abc", &meta("video.mp4")).await.unwrap();
        assert!(store.is_processed("abc").await);
        assert!(!store.is_processed("outro").await);
    }

    #[tokio::test]
    async fn mark_adds_processed_at_and_keeps_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.mark_processed("abc", &meta("video.mp4")).await.unwrap();
        let all = store.all().await.unwrap();
        let entry = all.get("abc").unwrap();
        assert_eq!(entry["fileName"], "video.mp4");
        assert_eq!(entry["youtubeId"], "yt123");
        assert!(entry["processedAt"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn corrupt_file_counts_as_not_processed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        tokio::fs::write(store.path(), "isto nao é json").await.unwrap();

        assert!(!store.is_processed("abc").await);
        // e a escrita seguinte falha de forma explícita, sem apagar o arquivo
        assert!(store.mark_processed("abc", &meta("v.mp4")).await.is_err());
    }

    #[tokio::test]
    async fn second_mark_overwrites_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.mark_processed("abc", &meta("v1.mp4")).await.unwrap();
        store.mark_processed("abc", &meta("v2.mp4")).await.unwrap();
        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["abc"]["fileName"], "v2.mp4");
    }
}
