use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, LOCATION};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::GoogleConfig;
use crate::uploader::{DriveFile, DriveStorage, UploadError, VideoHost};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_ABOUT_URL: &str = "https://www.googleapis.com/drive/v3/about";
const YOUTUBE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const YOUTUBE_CHANNELS_URL: &str = "https://www.googleapis.com/youtube/v3/channels";

/// Categoria fixa do YouTube ("People & Blogs").
const YOUTUBE_CATEGORY_ID: &str = "22";

/* =========================================
   Credenciais e token
   ========================================= */

#[derive(Debug, Clone, Deserialize)]
struct ClientInfo {
    client_id: String,
    client_secret: String,
}

/// O console do Google exporta `{"installed": {...}}` para apps de desktop e
/// `{"web": {...}}` para apps web; aceitamos os dois.
#[derive(Debug, Deserialize)]
struct OauthCredentials {
    installed: Option<ClientInfo>,
    web: Option<ClientInfo>,
}

impl OauthCredentials {
    fn client(self) -> Option<ClientInfo> {
        self.installed.or(self.web)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    /// Epoch em milissegundos, como o fluxo de autenticação grava.
    expiry_date: Option<i64>,
}

impl StoredToken {
    fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expiry_date, Some(exp) if exp <= now_ms)
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

/* =========================================
   Autenticação compartilhada
   ========================================= */

/// Par credencial + token compartilhado entre Drive e YouTube. A renovação é
/// serializada pelo mutex para não disparar dois refresh simultâneos; o token
/// renovado fica só em memória, o refresh_token configurado é o durável.
pub struct GoogleAuth {
    client: ClientInfo,
    token: tokio::sync::Mutex<StoredToken>,
    http: reqwest::Client,
}

impl GoogleAuth {
    /// `Ok(None)` quando credencial ou token não foram configurados; JSON
    /// malformado é erro de configuração e sobe.
    pub fn from_config(cfg: &GoogleConfig, http: reqwest::Client) -> anyhow::Result<Option<Self>> {
        let (Some(creds_raw), Some(token_raw)) =
            (cfg.credentials_json.as_deref(), cfg.oauth_token_json.as_deref())
        else {
            return Ok(None);
        };

        let creds: OauthCredentials =
            serde_json::from_str(creds_raw).context("analisando credenciais OAuth")?;
        let client = creds
            .client()
            .ok_or_else(|| anyhow!("credenciais OAuth sem bloco \"installed\" ou \"web\""))?;
        let token: StoredToken =
            serde_json::from_str(token_raw).context("analisando token OAuth")?;

        Ok(Some(Self {
            client,
            token: tokio::sync::Mutex::new(token),
            http,
        }))
    }

    /// Devolve um access token válido, renovando antes se já venceu.
    async fn bearer(&self) -> Result<String, UploadError> {
        let mut token = self.token.lock().await;
        if token.is_expired(chrono::Utc::now().timestamp_millis()) {
            info!("token OAuth expirado, renovando com refresh_token");
            self.refresh_locked(&mut token).await?;
        }
        Ok(token.access_token.clone())
    }

    /// Renovação incondicional, usada depois de um 401 no meio do caminho.
    async fn force_refresh(&self) -> Result<(), UploadError> {
        let mut token = self.token.lock().await;
        self.refresh_locked(&mut token).await
    }

    async fn refresh_locked(&self, token: &mut StoredToken) -> Result<(), UploadError> {
        let Some(refresh_token) = token.refresh_token.clone() else {
            warn!("refresh_token ausente; é preciso gerar um token novo manualmente");
            return Err(UploadError::TokenExpired);
        };

        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| UploadError::Other(anyhow!("renovando token OAuth: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // invalid_grant significa token revogado ou vencido demais.
            if status == StatusCode::UNAUTHORIZED || body.contains("invalid_grant") {
                return Err(UploadError::TokenExpired);
            }
            return Err(UploadError::Other(anyhow!(
                "renovação de token respondeu HTTP {status}: {body}"
            )));
        }

        let renewed: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| UploadError::Other(anyhow!("lendo resposta da renovação: {e}")))?;

        token.access_token = renewed.access_token;
        token.expiry_date = renewed
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp_millis() + secs * 1000);
        // O Google raramente devolve um refresh_token novo; preserva o antigo.
        if let Some(rt) = renewed.refresh_token {
            token.refresh_token = Some(rt);
        }
        info!("token OAuth renovado");
        Ok(())
    }
}

fn status_error(status: StatusCode, what: &str) -> UploadError {
    if status == StatusCode::UNAUTHORIZED {
        UploadError::TokenExpired
    } else {
        UploadError::Other(anyhow!("{what} respondeu HTTP {status}"))
    }
}

/* =========================================
   Drive
   ========================================= */

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileWire {
    id: String,
    name: String,
    mime_type: String,
    created_time: Option<String>,
    size: Option<String>,
}

pub struct GoogleDrive {
    auth: Arc<GoogleAuth>,
    http: reqwest::Client,
}

impl GoogleDrive {
    pub fn new(auth: Arc<GoogleAuth>, http: reqwest::Client) -> Self {
        Self { auth, http }
    }
}

#[async_trait]
impl DriveStorage for GoogleDrive {
    async fn file_metadata(&self, file_id: &str) -> Result<DriveFile, UploadError> {
        let bearer = self.auth.bearer().await?;
        let resp = self
            .http
            .get(format!("{DRIVE_FILES_URL}/{file_id}"))
            .query(&[("fields", "id,name,mimeType,createdTime,size,parents")])
            .bearer_auth(&bearer)
            .send()
            .await
            .map_err(|e| UploadError::Other(anyhow!("consultando arquivo no Drive: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, "Drive"));
        }
        let wire: DriveFileWire = resp
            .json()
            .await
            .map_err(|e| UploadError::Other(anyhow!("lendo metadados do Drive: {e}")))?;
        Ok(DriveFile {
            id: wire.id,
            name: wire.name,
            mime_type: wire.mime_type,
            created_time: wire.created_time,
            size: wire.size,
        })
    }

    async fn download_to(&self, file_id: &str, dest: &Path) -> Result<(), UploadError> {
        let bearer = self.auth.bearer().await?;
        let resp = self
            .http
            .get(format!("{DRIVE_FILES_URL}/{file_id}"))
            .query(&[("alt", "media")])
            .bearer_auth(&bearer)
            .send()
            .await
            .map_err(|e| UploadError::Other(anyhow!("baixando arquivo do Drive: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, "download do Drive"));
        }

        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| UploadError::Other(anyhow!("criando {}: {e}", dest.display())))?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| UploadError::Other(anyhow!("stream do Drive: {e}")))?;
            out.write_all(&chunk)
                .await
                .map_err(|e| UploadError::Other(anyhow!("gravando {}: {e}", dest.display())))?;
        }
        out.flush()
            .await
            .map_err(|e| UploadError::Other(anyhow!("finalizando {}: {e}", dest.display())))?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        let Ok(bearer) = self.auth.bearer().await else {
            return false;
        };
        self.http
            .get(DRIVE_ABOUT_URL)
            .query(&[("fields", "user")])
            .bearer_auth(&bearer)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/* =========================================
   YouTube
   ========================================= */

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

pub struct YoutubeClient {
    auth: Arc<GoogleAuth>,
    http: reqwest::Client,
}

impl YoutubeClient {
    pub fn new(auth: Arc<GoogleAuth>, http: reqwest::Client) -> Self {
        Self { auth, http }
    }

    /// Upload resumível em duas etapas: abre a sessão com os metadados e faz
    /// PUT do arquivo na URL que o YouTube devolve.
    async fn upload_once(
        &self,
        path: &Path,
        meta: &crate::uploader::VideoMeta,
    ) -> Result<String, UploadError> {
        let bearer = self.auth.bearer().await?;
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::Other(anyhow!("lendo {}: {e}", path.display())))?
            .len();
        info!(tamanho_mb = size / (1024 * 1024), "abrindo sessão de upload");

        let session = self
            .http
            .post(YOUTUBE_UPLOAD_URL)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(&bearer)
            .header("X-Upload-Content-Length", size)
            .header("X-Upload-Content-Type", "video/*")
            .json(&upload_body(meta))
            .send()
            .await
            .map_err(|e| UploadError::Other(anyhow!("abrindo sessão de upload: {e}")))?;

        let status = session.status();
        if !status.is_success() {
            return Err(status_error(status, "sessão de upload"));
        }
        let upload_url = session
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| UploadError::Other(anyhow!("sessão de upload sem header Location")))?;

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| UploadError::Other(anyhow!("abrindo {}: {e}", path.display())))?;
        let resp = self
            .http
            .put(&upload_url)
            .bearer_auth(&bearer)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|e| UploadError::Other(anyhow!("enviando vídeo: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, "upload do vídeo"));
        }
        let video: UploadedVideo = resp
            .json()
            .await
            .map_err(|e| UploadError::Other(anyhow!("resposta do YouTube inválida: {e}")))?;
        Ok(video.id)
    }
}

fn upload_body(meta: &crate::uploader::VideoMeta) -> serde_json::Value {
    serde_json::json!({
        "snippet": {
            "title": meta.title,
            "description": meta.description,
            "tags": meta.tags,
            "categoryId": YOUTUBE_CATEGORY_ID,
        },
        "status": {
            "privacyStatus": meta.privacy,
            "selfDeclaredMadeForKids": meta.self_declared_made_for_kids,
        },
    })
}

#[async_trait]
impl VideoHost for YoutubeClient {
    async fn upload(
        &self,
        path: &Path,
        meta: &crate::uploader::VideoMeta,
    ) -> Result<String, UploadError> {
        match self.upload_once(path, meta).await {
            Err(UploadError::TokenExpired) => {
                // O token pode ter caducado entre o bearer() e o PUT; renova
                // uma vez e repete o upload inteiro com stream novo.
                warn!("upload recusado por token; renovando e tentando de novo");
                self.auth.force_refresh().await?;
                self.upload_once(path, meta).await
            }
            other => other,
        }
    }

    async fn ping(&self) -> bool {
        let Ok(bearer) = self.auth.bearer().await else {
            return false;
        };
        self.http
            .get(YOUTUBE_CHANNELS_URL)
            .query(&[("part", "id"), ("mine", "true")])
            .bearer_auth(&bearer)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
