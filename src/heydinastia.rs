use serenity::all::{Context, Message};

use crate::agent::AgentQuestion;
use crate::config::Channels;
use crate::discord::reply_suppressed;
use crate::AppContext;

pub const TRIGGER: &str = "#heydinastia";

/// Tag de roteamento do fluxo n8n por canal de dúvidas; fora deles, nenhuma.
pub fn tag_for_channel(channels: &Channels, channel_id: u64) -> Option<&'static str> {
    if channel_id == channels.doubts_general {
        Some("public")
    } else if channel_id == channels.doubts_ofir {
        Some("ofir")
    } else if channel_id == channels.doubts_netsar {
        Some("netsar")
    } else if channel_id == channels.doubts_blacks {
        Some("blacks")
    } else {
        None
    }
}

pub struct HeyDinastia;

impl HeyDinastia {
    pub async fn on_message(ctx: &Context, app: &AppContext, msg: &Message) {
        if msg.author.bot || !msg.content.contains(TRIGGER) {
            return;
        }
        let url = app.settings.webhooks.hey_dinastia.clone();
        if url.is_empty() {
            tracing::debug!("webhook hey_dinastia não configurado");
            return;
        }

        let mut question = AgentQuestion::new(&msg.content, msg.channel_id.get());
        question.tag = tag_for_channel(&app.settings.channels, msg.channel_id.get());

        match app.agent.ask(&url, &question).await {
            Ok(Some(output)) => reply_suppressed(ctx, msg, &output).await,
            Ok(None) => {
                tracing::debug!(channel = msg.channel_id.get(), "agente respondeu sem texto");
            }
            // aqui o usuário não é notificado; só registramos
            Err(e) => tracing::error!(error = %e, "Erro ao acessar o n8n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Channels {
        Channels {
            purchase_validation: 0,
            thanks: 0,
            support_ranking: 0,
            doubts_general: 100,
            doubts_ofir: 200,
            doubts_netsar: 300,
            doubts_blacks: 400,
        }
    }

    #[test]
    fn maps_each_doubts_channel_to_its_tag() {
        let ch = channels();
        assert_eq!(tag_for_channel(&ch, 100), Some("public"));
        assert_eq!(tag_for_channel(&ch, 200), Some("ofir"));
        assert_eq!(tag_for_channel(&ch, 300), Some("netsar"));
        assert_eq!(tag_for_channel(&ch, 400), Some("blacks"));
    }

    #[test]
    fn unknown_channel_has_no_tag() {
        assert_eq!(tag_for_channel(&channels(), 999), None);
    }
}
