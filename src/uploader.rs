//! Pipeline Drive -> YouTube: recebe o id de um arquivo do Drive, baixa para
//! um diretório temporário, publica no YouTube como não listado e registra no
//! livro-razão. O arquivo temporário é removido em todos os desfechos.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::store::{FileStore, ProcessedMeta};

pub const DEFAULT_FOLDER: &str = "Sem Categoria";
pub const DEFAULT_TAGS: [&str; 2] = ["dinastia", "automático"];
pub const DEFAULT_PRIVACY: &str = "unlisted";

const VIDEO_EXTENSIONS: [&str; 5] = [".mp4", ".avi", ".mov", ".wmv", ".mkv"];

/* =========================================
   Erros
   ========================================= */

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("o arquivo {0} não é um vídeo válido")]
    NotVideo(String),
    #[error("token de autenticação inválido ou expirado")]
    TokenExpired,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/* =========================================
   Tipos de domínio
   ========================================= */

/// Metadados mínimos de um arquivo do Drive.
#[derive(Debug, Clone)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub created_time: Option<String>,
    pub size: Option<String>,
}

/// Metadados de publicação no YouTube.
#[derive(Debug, Clone)]
pub struct VideoMeta {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy: String,
    pub self_declared_made_for_kids: bool,
}

impl VideoMeta {
    /// O título é o nome exato do arquivo, sem retoques. A descrição repete o
    /// título; quem cataloga é a própria comunidade depois.
    pub fn for_file(file_name: &str) -> Self {
        Self {
            title: file_name.to_string(),
            description: file_name.to_string(),
            tags: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
            privacy: DEFAULT_PRIVACY.to_string(),
            self_declared_made_for_kids: false,
        }
    }
}

/// Aceita pelo MIME ou pela extensão, porque o Drive às vezes devolve
/// `application/octet-stream` para vídeos recém-sincronizados.
pub fn is_video_file(name: &str, mime_type: &str) -> bool {
    if mime_type.contains("video") {
        return true;
    }
    let lower = name.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Troca separadores e caracteres reservados por `_` antes de usar o nome
/// como caminho local.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

/* =========================================
   Colaboradores
   ========================================= */

#[async_trait]
pub trait DriveStorage: Send + Sync {
    async fn file_metadata(&self, file_id: &str) -> Result<DriveFile, UploadError>;
    async fn download_to(&self, file_id: &str, dest: &Path) -> Result<(), UploadError>;
    /// Sondagem barata de conectividade para o painel de status.
    async fn ping(&self) -> bool;
}

#[async_trait]
pub trait VideoHost: Send + Sync {
    /// Publica o arquivo e devolve o id do vídeo.
    async fn upload(&self, path: &Path, meta: &VideoMeta) -> Result<String, UploadError>;
    async fn ping(&self) -> bool;
}

/* =========================================
   Pipeline
   ========================================= */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    AlreadyProcessed,
    Uploaded {
        file_name: String,
        youtube_id: String,
        youtube_url: String,
    },
}

pub struct Uploader {
    store: Arc<FileStore>,
    drive: Arc<dyn DriveStorage>,
    host: Arc<dyn VideoHost>,
    temp_dir: PathBuf,
}

impl Uploader {
    pub fn new(
        store: Arc<FileStore>,
        drive: Arc<dyn DriveStorage>,
        host: Arc<dyn VideoHost>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            drive,
            host,
            temp_dir: temp_dir.into(),
        }
    }

    pub fn drive(&self) -> &dyn DriveStorage {
        self.drive.as_ref()
    }

    pub fn host(&self) -> &dyn VideoHost {
        self.host.as_ref()
    }

    /// Processa um arquivo do Drive de ponta a ponta.
    ///
    /// Idempotente por id: um arquivo já registrado devolve
    /// [`ProcessOutcome::AlreadyProcessed`] sem tocar no Drive.
    pub async fn process(
        &self,
        file_id: &str,
        folder_name: Option<&str>,
    ) -> Result<ProcessOutcome, UploadError> {
        if self.store.is_processed(file_id).await {
            info!(file_id, "arquivo já processado anteriormente, ignorando");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        info!(file_id, "obtendo detalhes do arquivo no Drive");
        let file = self.drive.file_metadata(file_id).await?;
        info!(
            nome = %file.name,
            tipo = %file.mime_type,
            tamanho = file.size.as_deref().unwrap_or("?"),
            "detalhes do arquivo"
        );

        if !is_video_file(&file.name, &file.mime_type) {
            warn!(nome = %file.name, "arquivo não é um vídeo válido");
            return Err(UploadError::NotVideo(file.name));
        }

        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| anyhow::anyhow!("criando diretório temporário: {e}"))?;
        let local = self.temp_dir.join(sanitize_file_name(&file.name));

        let result = self.download_and_publish(file_id, folder_name, &file, &local).await;

        // Limpeza incondicional; o download pode ter deixado um parcial.
        match tokio::fs::remove_file(&local).await {
            Ok(()) => info!(caminho = %local.display(), "arquivo temporário removido"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(caminho = %local.display(), error = %e, "falha ao remover temporário"),
        }

        result
    }

    async fn download_and_publish(
        &self,
        file_id: &str,
        folder_name: Option<&str>,
        file: &DriveFile,
        local: &Path,
    ) -> Result<ProcessOutcome, UploadError> {
        info!(nome = %file.name, "baixando arquivo do Drive");
        self.drive.download_to(file_id, local).await?;

        let meta = VideoMeta::for_file(&file.name);
        info!(titulo = %meta.title, "iniciando upload para o YouTube");
        let youtube_id = self.host.upload(local, &meta).await?;
        let youtube_url = format!("https://www.youtube.com/watch?v={youtube_id}");
        info!(%youtube_id, %youtube_url, "upload concluído");

        let record = ProcessedMeta {
            folder_name: Some(folder_name.unwrap_or(DEFAULT_FOLDER).to_string()),
            file_name: file.name.clone(),
            created_time: file.created_time.clone(),
            file_size: file.size.clone(),
            youtube_id: youtube_id.clone(),
            youtube_url: youtube_url.clone(),
        };
        // Falha de registro não desfaz um upload que já aconteceu.
        if let Err(e) = self.store.mark_processed(file_id, &record).await {
            error!(error = ?e, "falha ao registrar arquivo processado");
        }

        Ok(ProcessOutcome::Uploaded {
            file_name: file.name.clone(),
            youtube_id,
            youtube_url,
        })
    }
}
