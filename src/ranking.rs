use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use serenity::all::{ChannelId, Context, CreateMessage, Message};

use crate::AppContext;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThanksEntry {
    pub support_id: String,
    pub support: String,
    pub thanked_by: String,
    pub message_content: String,
    pub timestamp: String,
}

#[derive(Serialize)]
struct ThanksPayload<'a> {
    thanks: &'a [ThanksEntry],
}

/// Um evento por usuário mencionado na mensagem de agradecimento.
pub fn build_thanks(
    thanked_by: &str,
    mentioned: &[(u64, String)],
    content: &str,
    now: DateTime<Utc>,
) -> Vec<ThanksEntry> {
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    mentioned
        .iter()
        .map(|(id, name)| ThanksEntry {
            support_id: id.to_string(),
            support: name.clone(),
            thanked_by: thanked_by.to_string(),
            message_content: content.to_string(),
            timestamp: timestamp.clone(),
        })
        .collect()
}

pub struct Ranking;

impl Ranking {
    /// Mensagem no canal de agradecimentos com menções => envia ao n8n.
    pub async fn on_message(app: &AppContext, msg: &Message) {
        let thanks_channel = app.settings.channels.thanks;
        if thanks_channel == 0 || msg.channel_id.get() != thanks_channel {
            return;
        }
        if msg.author.bot || msg.mentions.is_empty() {
            return;
        }
        let url = app.settings.webhooks.send_thanks.clone();
        if url.is_empty() {
            tracing::debug!("webhook send_thanks não configurado");
            return;
        }

        let mentioned: Vec<(u64, String)> = msg
            .mentions
            .iter()
            .map(|u| (u.id.get(), u.name.clone()))
            .collect();
        let entries = build_thanks(&msg.author.name, &mentioned, &msg.content, Utc::now());

        let outcome = app
            .http
            .post(&url)
            .json(&ThanksPayload { thanks: &entries })
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match outcome {
            Ok(_) => tracing::info!(count = entries.len(), "Agradecimento enviado ao n8n!"),
            Err(e) => tracing::error!(error = %e, "Erro ao enviar agradecimento ao n8n"),
        }
    }

    /// Gatilho diário do agendador: busca o texto do ranking e publica.
    pub async fn post_daily(ctx: &Context, app: &AppContext) {
        let url = app.settings.webhooks.support_ranking.clone();
        if url.is_empty() {
            tracing::warn!("webhook support_ranking não configurado; ranking diário pulado");
            return;
        }
        let channel = app.settings.channels.support_ranking;
        if channel == 0 {
            tracing::warn!("canal de ranking não configurado; ranking diário pulado");
            return;
        }

        tracing::info!("📊 Buscando dados de ranking de suporte...");
        let body: Result<Value, _> = async {
            let resp = app.http.get(&url).send().await?.error_for_status()?;
            resp.json::<Value>().await
        }
        .await;

        let message = match body {
            Ok(v) => v
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_default(),
            Err(e) => {
                tracing::error!(error = %e, "❌ Erro ao processar ranking de suporte");
                return;
            }
        };
        if message.is_empty() {
            tracing::error!("❌ Dados de ranking inválidos ou vazios.");
            return;
        }

        match ChannelId::new(channel)
            .send_message(&ctx.http, CreateMessage::new().content(message))
            .await
        {
            Ok(_) => tracing::info!("✅ Ranking de suporte enviado com sucesso!"),
            Err(e) => tracing::error!(error = ?e, "❌ Canal de ranking indisponível"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn one_entry_per_mentioned_user() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mentioned = vec![(1u64, "ana".to_string()), (2u64, "bia".to_string())];
        let entries = build_thanks("carlos", &mentioned, "obrigado @ana @bia!", now);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].support_id, "1");
        assert_eq!(entries[0].support, "ana");
        assert_eq!(entries[0].thanked_by, "carlos");
        assert_eq!(entries[0].message_content, "obrigado @ana @bia!");
        assert_eq!(entries[0].timestamp, "2025-03-01T12:00:00.000Z");
        assert_eq!(entries[1].support_id, "2");
    }

    #[test]
    fn no_mentions_builds_nothing() {
        let now = Utc::now();
        assert!(build_thanks("carlos", &[], "valeu!", now).is_empty());
    }

    #[test]
    fn payload_wraps_entries_under_thanks_key() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let entries = build_thanks("c", &[(9, "z".to_string())], "vlw", now);
        let v = serde_json::to_value(ThanksPayload { thanks: &entries }).unwrap();
        assert!(v["thanks"].is_array());
        assert_eq!(v["thanks"][0]["support_id"], "9");
    }
}
