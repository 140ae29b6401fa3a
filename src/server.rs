// src/server.rs

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::uploader::{ProcessOutcome, UploadError};
use crate::AppContext;

/// O corpo é só JSON, mas o n8n às vezes anexa metadados generosos.
const BODY_LIMIT: usize = 50 * 1024 * 1024;

pub const VERSION: &str = "1.0.0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrivePayload {
    file_id: Option<String>,
    folder_name: Option<String>,
}

pub fn router(app: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/webhook/drive-to-youtube", post(drive_to_youtube))
        .route("/api/webhook/status", get(webhook_status))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(app)
}

/// Sobe o servidor e só retorna quando ele cair.
pub async fn serve(app: Arc<AppContext>) -> anyhow::Result<()> {
    let port = app.settings.server.port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "servidor webhook no ar");
    axum::serve(listener, router(app)).await?;
    Ok(())
}

/// Chamado pelo n8n quando um arquivo novo aparece na pasta monitorada.
async fn drive_to_youtube(
    State(app): State<Arc<AppContext>>,
    payload: Result<Json<DrivePayload>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let payload = match payload {
        Ok(Json(p)) => p,
        Err(rejection) => {
            warn!(error = %rejection, "payload do webhook rejeitado");
            return if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                reply_err(StatusCode::PAYLOAD_TOO_LARGE, "Payload muito grande")
            } else {
                reply_err(StatusCode::BAD_REQUEST, "Invalid JSON")
            };
        }
    };

    let Some(file_id) = payload.file_id.filter(|id| !id.is_empty()) else {
        warn!("webhook sem fileId no payload");
        return reply_err(StatusCode::BAD_REQUEST, "ID do arquivo é obrigatório");
    };

    let Some(uploader) = app.uploader.as_ref() else {
        error!("uploader indisponível: credenciais OAuth não configuradas");
        return reply_err(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Credenciais OAuth não encontradas no ambiente",
        );
    };

    info!(%file_id, "processando arquivo recebido pelo webhook");
    match uploader.process(&file_id, payload.folder_name.as_deref()).await {
        Ok(ProcessOutcome::AlreadyProcessed) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": "already_processed",
                "message": "Arquivo já foi processado anteriormente",
            })),
        ),
        Ok(ProcessOutcome::Uploaded {
            file_name,
            youtube_id,
            youtube_url,
        }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Arquivo processado com sucesso",
                "details": {
                    "fileName": file_name,
                    "youtubeId": youtube_id,
                    "youtubeUrl": youtube_url,
                },
            })),
        ),
        Err(UploadError::NotVideo(_)) => {
            reply_err(StatusCode::BAD_REQUEST, "O arquivo não é um vídeo válido")
        }
        Err(UploadError::TokenExpired) => {
            notify_token_error(&app, &file_id).await;
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "success": false,
                    "error": "Token de autenticação inválido ou expirado",
                    "needsTokenRenewal": true,
                })),
            )
        }
        Err(UploadError::Other(e)) => {
            error!(%file_id, error = ?e, "falha ao processar arquivo");
            reply_err(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn webhook_status(State(app): State<Arc<AppContext>>) -> (StatusCode, Json<Value>) {
    let (drive_ok, youtube_ok) = match app.uploader.as_ref() {
        Some(up) => tokio::join!(up.drive().ping(), up.host().ping()),
        None => (false, false),
    };

    let connected = |ok: bool| if ok { "connected" } else { "error" };
    (
        StatusCode::OK,
        Json(json!({
            "status": "online",
            "services": {
                "drive": connected(drive_ok),
                "youtube": connected(youtube_ok),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": VERSION,
        })),
    )
}

fn token_alert_payload(file_id: &str, now_iso: &str) -> Value {
    json!({
        "username": "Sistema DinastIA",
        "embeds": [{
            "title": "⚠️ Alerta do Sistema YouTube",
            "description": format!(
                "⚠️ Erro de token ao processar arquivo: {file_id}. O sistema tentará renovar automaticamente o token na próxima requisição."
            ),
            "color": 16711680, // vermelho
            "timestamp": now_iso,
            "footer": { "text": "Sistema de upload automático DinastIA" },
        }],
    })
}

/// Alerta de token vencido no canal de avisos do sistema. Falha aqui não muda
/// a resposta do webhook.
async fn notify_token_error(app: &AppContext, file_id: &str) {
    let url = app.settings.webhooks.support_ranking.clone();
    if url.is_empty() {
        warn!("URL de webhook não configurada para notificações");
        return;
    }
    let payload = token_alert_payload(file_id, &chrono::Utc::now().to_rfc3339());
    match app.http.post(&url).json(&payload).send().await {
        Ok(resp) if resp.status().is_success() => {
            info!("✅ Notificação de erro enviada para o Discord");
        }
        Ok(resp) => warn!(status = %resp.status(), "notificação de erro recusada"),
        Err(e) => warn!(error = %e, "❌ Erro ao enviar notificação Discord"),
    }
}

async fn not_found() -> (StatusCode, Json<Value>) {
    reply_err(StatusCode::NOT_FOUND, "Endpoint não encontrado")
}

fn reply_err(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "success": false, "error": message })))
}
