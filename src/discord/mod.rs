// src/discord/mod.rs
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures_util::FutureExt;
use serenity::all::*;
use serenity::async_trait;

use crate::heydinastia::HeyDinastia;
use crate::purchase::Purchase;
use crate::ranking::Ranking;
use crate::AppContext;

pub struct Handler {
    pub app: Arc<AppContext>,
    cron_started: AtomicBool,
}

impl Handler {
    pub fn new(app: Arc<AppContext>) -> Self {
        Self {
            app,
            cron_started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(
            "🤖 {} online como {}",
            self.app.settings.app.name,
            ready.user.name
        );

        if let Err(e) = Purchase::ensure_panel(&ctx, &self.app).await {
            tracing::warn!(error = ?e, "falha ao garantir painel de validação de compra");
        }

        for g in &ready.guilds {
            self.app.onboarding().on_ready_guild(&ctx, g.id).await;
        }

        // ready repete em reconexão; o agendador sobe uma vez por processo.
        if !self.cron_started.swap(true, Ordering::SeqCst) {
            let app = self.app.clone();
            let cron_ctx = ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::cron::start(cron_ctx, app).await {
                    tracing::error!(error = ?e, "agendador de tarefas não subiu");
                }
            });
        }
    }

    /// Porta de entrada das interações: botões e modais.
    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let fut = async {
            self.app.onboarding().on_interaction(&ctx, &interaction).await;
            Purchase::on_interaction(&ctx, &self.app, &interaction).await;
        };
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            tracing::error!("pânico ao tratar interação");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let fut = async {
            HeyDinastia::on_message(&ctx, &self.app, &msg).await;
            self.app.onboarding().on_message(&ctx, &msg).await;
            Ranking::on_message(&self.app, &msg).await;
        };
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            tracing::error!(canal = msg.channel_id.get(), "pânico ao tratar mensagem");
        }
    }

    async fn guild_member_removal(
        &self,
        ctx: Context,
        guild_id: GuildId,
        user: User,
        _member: Option<Member>,
    ) {
        self.app.onboarding().on_member_leave(&ctx, guild_id, &user).await;
    }
}

/// Responde citando a mensagem, sem pingar o autor e sem expandir embeds.
/// Se a referência falhar (mensagem apagada no meio do caminho), cai para um
/// envio simples mencionando o autor.
pub(crate) async fn reply_suppressed(ctx: &Context, msg: &Message, text: &str) {
    let reply = CreateMessage::new()
        .content(text)
        .reference_message(msg)
        .allowed_mentions(CreateAllowedMentions::new())
        .flags(MessageFlags::SUPPRESS_EMBEDS);
    if let Err(e) = msg.channel_id.send_message(&ctx.http, reply).await {
        tracing::warn!(error = ?e, "resposta com referência falhou, tentando envio simples");
        let fallback =
            CreateMessage::new().content(format!("<@{}> {}", msg.author.id.get(), text));
        if let Err(e) = msg.channel_id.send_message(&ctx.http, fallback).await {
            tracing::error!(error = ?e, canal = msg.channel_id.get(), "não foi possível responder");
        }
    }
}

fn intents_from_settings(names: &[String]) -> GatewayIntents {
    let mut i = GatewayIntents::empty();
    for n in names {
        match n.as_str() {
            "GUILDS" => i |= GatewayIntents::GUILDS,
            "GUILD_MEMBERS" => i |= GatewayIntents::GUILD_MEMBERS,
            "GUILD_MESSAGES" => i |= GatewayIntents::GUILD_MESSAGES,
            "MESSAGE_CONTENT" => i |= GatewayIntents::MESSAGE_CONTENT,
            "DIRECT_MESSAGES" => i |= GatewayIntents::DIRECT_MESSAGES,
            _ => {}
        }
    }
    i
}

pub async fn run_bot(app: Arc<AppContext>) -> Result<()> {
    let token = &app.settings.discord.token;
    if token.is_empty() {
        anyhow::bail!("Token do Discord ausente (DIA_DISCORD__TOKEN). Preencha o .env.");
    }

    let intents = intents_from_settings(&app.settings.discord.intents);

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(Handler::new(app.clone()))
        .await?;

    // Encerramento limpo no Ctrl+C.
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("sinal de encerramento recebido, desligando shards");
            shard_manager.shutdown_all().await;
        }
    });

    tracing::info!("cliente Discord iniciando");
    client.start().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_parse_known_names_and_skip_unknown() {
        let i = intents_from_settings(&[
            "GUILDS".to_string(),
            "MESSAGE_CONTENT".to_string(),
            "NAO_EXISTE".to_string(),
        ]);
        assert!(i.contains(GatewayIntents::GUILDS));
        assert!(i.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(!i.contains(GatewayIntents::GUILD_MEMBERS));
    }
}
