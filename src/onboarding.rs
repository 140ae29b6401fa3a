//! src/onboarding.rs
//! Ciclo de vida do onboarding da DinastIA em um arquivo.
//!
//! Cobre:
//! - Canal de entrada `🚀｜comece-aqui` com painel único (ensure idempotente)
//! - Abertura do canal privado no clique do botão (com guarda anti-corrida)
//! - Proxy de conversa com a Jurema dentro do canal privado
//! - Varredura horária de canais inativos (1h sem mensagem)
//! - Limpeza do canal quando o membro sai do servidor
//!
//! A lógica de decisão opera sobre `ChannelDirectory`/`MessagingClient`
//! (testável com fakes); a camada serenity resolve ids, responde interações
//! e delega.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serenity::all::{
    ComponentInteraction, Context, GuildId, Interaction, Message, User,
};
use serenity::builder::{
    CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
};

use crate::agent::AgentQuestion;
use crate::config::OnboardingConfig;
use crate::discord::reply_suppressed;
use crate::locator::{
    self, ChannelDirectory, ChannelKind, ChannelRecord, GuildDirectory, MemberChannelSpec,
    MessagingClient, PanelSpec,
};
use crate::normalize;
use crate::AppContext;

pub const START_BUTTON_ID: &str = "start_onboarding";

const ENTRY_CREATE_NAME: &str = "🚀｜comece-aqui";
const ENTRY_TOPIC: &str = "Canal de onboarding da Dinastia";

const PANEL_TITLE: &str = "🚀 Você está no canal de onboarding da Dinastia!";
const PANEL_DESCRIPTION: &str = "Ao clicar no botão abaixo, eu criarei um canal privado que somente nós e os **ADMs** teremos acesso. \n\nNesse canal, irei te guiar nos seus primeiros passos aqui na nossa comunidade. Vamos lá?";
const PANEL_COLOUR: u32 = 0xCCA700;
const PANEL_FOOTER: &str = "DinastIA - Bem-vindo à sua jornada!";
const PANEL_FOOTER_ICON: &str = "https://i.imgur.com/5w4E5TO.png";
const PANEL_BUTTON_LABEL: &str = "Começar Onboarding";

const MSG_NO_CATEGORY: &str = "A categoria 'onboard' não existe.";
const MSG_ALREADY_HAS_CHANNEL: &str = "Você já possui um canal privado de onboarding!";
const MSG_IN_FLIGHT: &str = "Já estou criando seu canal privado, um instante…";
const MSG_CREATING: &str = "Criando seu canal privado…";
const MSG_GUILD_ONLY: &str = "Esta ação só funciona dentro do servidor.";
const MSG_UNEXPECTED: &str =
    "Ocorreu um erro inesperado. Por favor, tente novamente mais tarde.";
const MSG_AGENT_DOWN: &str =
    "Não foi possível conectar ao sistema de resposta. Por favor, tente novamente mais tarde.";

fn welcome_text(user_id: u64) -> String {
    format!(
        "**Olá, <@{user_id}>, seja bem-vindo(a) à DinastIA!**\n\n Este canal é privado e somente você e os admins podem vê-lo. Aqui você poderá para tirar dúvidas comigo a respeito dos nossos Canais, Cargos, Trilhas e Agentes e eu irei te guiar da melhor forma nos seus primeiros passos.\n\nPara que possamos iniciar, me conte um pouco sobre o seu nível de conhecimento com Agentes IA. Você já trabalha com automações ou é seu primeiro contato?"
    )
}

fn panel_spec() -> PanelSpec<'static> {
    PanelSpec {
        title: PANEL_TITLE,
        description: PANEL_DESCRIPTION,
        colour: PANEL_COLOUR,
        footer_text: PANEL_FOOTER,
        footer_icon: PANEL_FOOTER_ICON,
        button_id: START_BUTTON_ID,
        button_label: PANEL_BUTTON_LABEL,
        button_emoji: Some('🚀'),
    }
}

/* =========================================
   Resultados das operações
   ========================================= */

#[derive(Debug, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Categoria ausente: condição terminal, só logamos.
    NoCategory,
    Ready {
        channel: u64,
        created_channel: bool,
        posted_panel: bool,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    NoCategory,
    AlreadyExists { channel: u64 },
    Created { channel: u64 },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: u32,
    pub deleted: u32,
    pub failures: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LeaveOutcome {
    NoCategory,
    NotFound,
    Deleted { channel: u64 },
}

/// Pedido de abertura já com as permissões resolvidas pela camada Discord.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub username: String,
    pub user_id: u64,
    pub admin_role: Option<u64>,
    pub operator: Option<u64>,
}

/// Categoria de onboarding: id explícito quando configurado, senão nome exato.
pub fn resolve_category<'a>(
    channels: &'a [ChannelRecord],
    cfg: &OnboardingConfig,
) -> Option<&'a ChannelRecord> {
    if cfg.category_id != 0 {
        if let Some(c) = channels
            .iter()
            .find(|c| c.kind == ChannelKind::Category && c.id == cfg.category_id)
        {
            return Some(c);
        }
    }
    locator::find_category(channels, &cfg.category)
}

/* =========================================
   Serviço
   ========================================= */

pub struct Onboarding {
    app: Arc<AppContext>,
    /// Identidades (normalizadas) com criação de canal em andamento.
    in_flight: DashMap<String, ()>,
}

impl Onboarding {
    pub fn new(app: Arc<AppContext>) -> Arc<Self> {
        Arc::new(Self {
            app,
            in_flight: DashMap::new(),
        })
    }

    /* ======================
       Núcleo (traits)
       ====================== */

    /// Garante canal de entrada + exatamente um painel de boas-vindas.
    pub async fn ensure_entry(
        dir: &impl ChannelDirectory,
        msgs: &impl MessagingClient,
        cfg: &OnboardingConfig,
    ) -> Result<EntryOutcome> {
        let snapshot = dir.snapshot().await?;
        let Some(category) = resolve_category(&snapshot, cfg) else {
            tracing::error!("A categoria '{}' não existe.", cfg.category);
            return Ok(EntryOutcome::NoCategory);
        };
        let category_id = category.id;

        let existing =
            locator::find_entry_channel(&snapshot, category_id, &cfg.entry_channels).map(|c| c.id);

        let (channel, created_channel) = match existing {
            Some(id) => (id, false),
            None => {
                let created = dir
                    .create_entry_channel(ENTRY_CREATE_NAME, category_id, ENTRY_TOPIC)
                    .await?;
                tracing::info!(channel = created.id, "canal de entrada criado");
                (created.id, true)
            }
        };

        let posted_panel = if msgs.has_welcome_message(channel, START_BUTTON_ID).await? {
            false
        } else {
            msgs.post_panel(channel, &panel_spec()).await?;
            true
        };

        Ok(EntryOutcome::Ready {
            channel,
            created_channel,
            posted_panel,
        })
    }

    /// Abre o canal privado de um membro, com deduplicação por nome em toda a
    /// guilda. A janela entre a checagem e a criação é coberta pelo guard
    /// `in_flight` do chamador.
    pub async fn open_private(
        dir: &impl ChannelDirectory,
        msgs: &impl MessagingClient,
        cfg: &OnboardingConfig,
        req: &OpenRequest,
    ) -> Result<OpenOutcome> {
        let snapshot = dir.snapshot().await?;
        let Some(category) = resolve_category(&snapshot, cfg) else {
            return Ok(OpenOutcome::NoCategory);
        };

        if let Some(existing) = locator::find_channel_for_user(&snapshot, &req.username) {
            return Ok(OpenOutcome::AlreadyExists {
                channel: existing.id,
            });
        }

        let spec = MemberChannelSpec {
            name: normalize::channel_name_for(&req.username),
            topic: format!("Onboarding de {}", req.username),
            category: category.id,
            member: req.user_id,
            admin_role: req.admin_role,
            operator: req.operator,
        };
        let created = dir.create_member_channel(&spec).await?;
        msgs.send_text(created.id, &welcome_text(req.user_id)).await?;

        Ok(OpenOutcome::Created {
            channel: created.id,
        })
    }

    /// Exclui canais da categoria sem mensagem há mais de `idle_minutes`
    /// (ou sem mensagem alguma). Falha em um canal não interrompe os demais.
    pub async fn sweep(
        dir: &impl ChannelDirectory,
        msgs: &impl MessagingClient,
        cfg: &OnboardingConfig,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let snapshot = dir.snapshot().await?;
        let Some(category) = resolve_category(&snapshot, cfg) else {
            tracing::warn!("Categoria '{}' não encontrada; varredura pulada.", cfg.category);
            return Ok(SweepReport::default());
        };
        let category_id = category.id;
        let idle = Duration::minutes(cfg.idle_minutes as i64);

        let mut report = SweepReport::default();
        for ch in snapshot.iter().filter(|c| {
            c.kind == ChannelKind::Text && c.parent_id == Some(category_id)
        }) {
            if cfg.entry_channels.iter().any(|n| *n == ch.name) {
                continue;
            }
            report.scanned += 1;

            let stale = match msgs.last_activity(ch.id).await {
                Ok(None) => true,
                Ok(Some(last)) => now.signed_duration_since(last) > idle,
                Err(e) => {
                    tracing::error!(error = ?e, channel = %ch.name, "❌ Erro ao processar canal");
                    report.failures += 1;
                    continue;
                }
            };
            if !stale {
                continue;
            }

            match dir.delete_channel(ch.id).await {
                Ok(()) => {
                    tracing::info!(channel = %ch.name, "🧹 Canal inativo excluído");
                    report.deleted += 1;
                }
                Err(e) => {
                    tracing::error!(error = ?e, channel = %ch.name, "❌ Erro ao excluir canal");
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// Remove o canal de quem saiu: nome normalizado primeiro, tópico como
    /// plano B. Não achar nada é um não-evento.
    pub async fn remove_for_leaver(
        dir: &impl ChannelDirectory,
        cfg: &OnboardingConfig,
        username: &str,
    ) -> Result<LeaveOutcome> {
        let snapshot = dir.snapshot().await?;
        let Some(category) = resolve_category(&snapshot, cfg) else {
            return Ok(LeaveOutcome::NoCategory);
        };

        let Some(target) = locator::find_leave_channel(&snapshot, category.id, username) else {
            return Ok(LeaveOutcome::NotFound);
        };
        let id = target.id;
        dir.delete_channel(id).await?;
        Ok(LeaveOutcome::Deleted { channel: id })
    }

    /* ======================
       Camada Discord
       ====================== */

    /// Chamado no `ready` para cada guilda conhecida.
    pub async fn on_ready_guild(&self, ctx: &Context, guild_id: GuildId) {
        let dir = GuildDirectory::new(ctx, guild_id);
        match Self::ensure_entry(&dir, &dir, &self.app.settings.onboarding).await {
            Ok(EntryOutcome::Ready {
                channel,
                created_channel,
                posted_panel,
            }) => {
                tracing::info!(
                    gid = %guild_id.get(),
                    channel,
                    created_channel,
                    posted_panel,
                    "✅ canal de onboarding pronto para uso"
                );
            }
            Ok(EntryOutcome::NoCategory) => {}
            Err(e) => {
                tracing::error!(error = ?e, gid = %guild_id.get(), "❌ Erro ao preparar canal de onboarding");
            }
        }
    }

    pub async fn on_interaction(&self, ctx: &Context, interaction: &Interaction) {
        let Some(comp) = interaction.clone().message_component() else {
            return;
        };
        if comp.data.custom_id != START_BUTTON_ID {
            return;
        }
        self.on_start_button(ctx, &comp).await;
    }

    async fn on_start_button(&self, ctx: &Context, comp: &ComponentInteraction) {
        let Some(guild_id) = comp.guild_id else {
            Self::reply_ephemeral(ctx, comp, MSG_GUILD_ONLY).await;
            return;
        };
        let username = comp.user.name.clone();

        // Uma criação por identidade de cada vez.
        let key = normalize::normalize_username(&username);
        let _guard = match FlightGuard::try_acquire(&self.in_flight, key) {
            Some(g) => g,
            None => {
                Self::reply_ephemeral(ctx, comp, MSG_IN_FLIGHT).await;
                return;
            }
        };

        // ACK rápido, edição depois.
        Self::reply_ephemeral(ctx, comp, MSG_CREATING).await;

        let req = OpenRequest {
            user_id: comp.user.id.get(),
            admin_role: self.resolve_admin_role(ctx, guild_id).await,
            operator: self.resolve_operator(ctx, guild_id).await,
            username,
        };

        let dir = GuildDirectory::new(ctx, guild_id);
        let outcome =
            Self::open_private(&dir, &dir, &self.app.settings.onboarding, &req).await;

        let text = match outcome {
            Ok(OpenOutcome::Created { channel }) => {
                tracing::info!(gid = %guild_id.get(), channel, user = %req.username, "canal privado de onboarding criado");
                format!("Seu canal privado está pronto: <#{channel}>")
            }
            Ok(OpenOutcome::AlreadyExists { .. }) => MSG_ALREADY_HAS_CHANNEL.to_string(),
            Ok(OpenOutcome::NoCategory) => MSG_NO_CATEGORY.to_string(),
            Err(e) => {
                tracing::error!(error = ?e, gid = %guild_id.get(), user = %req.username, "❌ Erro ao criar canal privado");
                MSG_UNEXPECTED.to_string()
            }
        };
        let _ = comp
            .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
            .await;
    }

    /// Mensagem dentro do canal privado do autor => repassa à Jurema.
    pub async fn on_message(&self, ctx: &Context, msg: &Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else { return };
        let url = self.app.settings.webhooks.jurema_onboarding.clone();
        if url.is_empty() {
            return;
        }

        let Ok(channel) = msg.channel(&ctx).await else {
            return;
        };
        let Some(channel) = channel.guild() else { return };
        if !self.in_onboard_category(ctx, guild_id, channel.parent_id.map(|p| p.get())) {
            return;
        }
        if !normalize::matches(&channel.name, &msg.author.name) {
            return;
        }

        let roles = self.role_names(ctx, guild_id, msg).await;
        let display = msg
            .member
            .as_ref()
            .and_then(|m| m.nick.clone())
            .or_else(|| msg.author.global_name.clone())
            .unwrap_or_else(|| msg.author.name.clone());

        let mut question = AgentQuestion::new(&msg.content, msg.channel_id.get());
        question.username = Some(&msg.author.name);
        question.display_name = Some(&display);
        question.roles = Some(roles);

        match self.app.agent.ask(&url, &question).await {
            Ok(Some(output)) => reply_suppressed(ctx, msg, &output).await,
            Ok(None) => {
                tracing::debug!(gid = %guild_id.get(), user = %msg.author.name, "agente respondeu sem texto");
            }
            Err(e) => {
                tracing::error!(error = %e, gid = %guild_id.get(), user = %msg.author.name, "falha na conversa com o agente");
                reply_suppressed(ctx, msg, MSG_AGENT_DOWN).await;
            }
        }
    }

    /// Gatilho horário do agendador.
    pub async fn sweep_guild(&self, ctx: &Context, guild_id: GuildId) {
        let dir = GuildDirectory::new(ctx, guild_id);
        match Self::sweep(&dir, &dir, &self.app.settings.onboarding, Utc::now()).await {
            Ok(report) => {
                tracing::info!(
                    gid = %guild_id.get(),
                    scanned = report.scanned,
                    deleted = report.deleted,
                    failures = report.failures,
                    "🧹 varredura de onboarding concluída"
                );
            }
            Err(e) => {
                tracing::error!(error = ?e, gid = %guild_id.get(), "❌ Erro ao executar limpeza de canais");
            }
        }
    }

    pub async fn on_member_leave(&self, ctx: &Context, guild_id: GuildId, user: &User) {
        let dir = GuildDirectory::new(ctx, guild_id);
        match Self::remove_for_leaver(&dir, &self.app.settings.onboarding, &user.name).await {
            Ok(LeaveOutcome::Deleted { channel }) => {
                tracing::info!(
                    "🗑️ Canal {} excluído porque {} saiu do servidor.",
                    channel,
                    user.tag()
                );
            }
            Ok(LeaveOutcome::NotFound) => {
                tracing::info!("ℹ️ Nenhum canal encontrado para {}.", user.tag());
            }
            Ok(LeaveOutcome::NoCategory) => {}
            Err(e) => {
                tracing::error!(error = ?e, user = %user.tag(), "❌ Erro ao excluir o canal");
            }
        }
    }

    /* ======================
       Resoluções auxiliares
       ====================== */

    fn in_onboard_category(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        parent: Option<u64>,
    ) -> bool {
        let Some(parent) = parent else { return false };
        let cfg = &self.app.settings.onboarding;
        if cfg.category_id != 0 {
            return parent == cfg.category_id;
        }
        // sem id configurado, compara o nome da categoria via cache
        ctx.cache
            .guild(guild_id)
            .and_then(|g| {
                g.channels
                    .get(&serenity::all::ChannelId::new(parent))
                    .map(|c| c.name == cfg.category)
            })
            .unwrap_or(false)
    }

    async fn resolve_admin_role(&self, ctx: &Context, guild_id: GuildId) -> Option<u64> {
        let wanted = self.app.settings.onboarding.admin_role.clone();
        let cached = ctx.cache.guild(guild_id).and_then(|g| {
            g.roles
                .values()
                .find(|r| r.name == wanted)
                .map(|r| r.id.get())
        });
        if cached.is_some() {
            return cached;
        }
        match guild_id.roles(&ctx.http).await {
            Ok(map) => map.values().find(|r| r.name == wanted).map(|r| r.id.get()),
            Err(e) => {
                tracing::warn!(error = ?e, gid = %guild_id.get(), "não consegui listar cargos");
                None
            }
        }
    }

    async fn resolve_operator(&self, ctx: &Context, guild_id: GuildId) -> Option<u64> {
        let wanted = self.app.settings.onboarding.operator.clone();
        let cached = ctx.cache.guild(guild_id).and_then(|g| {
            g.members
                .values()
                .find(|m| m.user.name == wanted)
                .map(|m| m.user.id.get())
        });
        if cached.is_some() {
            return cached;
        }
        match guild_id
            .search_members(&ctx.http, &wanted, Some(1))
            .await
        {
            Ok(found) => found
                .into_iter()
                .find(|m| m.user.name == wanted)
                .map(|m| m.user.id.get()),
            Err(e) => {
                tracing::warn!(error = ?e, gid = %guild_id.get(), operator = %wanted, "Erro ao buscar o usuário operador");
                None
            }
        }
    }

    async fn role_names(&self, ctx: &Context, guild_id: GuildId, msg: &Message) -> Vec<String> {
        let Some(member) = msg.member.as_deref() else {
            return Vec::new();
        };
        let cached: Option<Vec<String>> = ctx.cache.guild(guild_id).map(|g| {
            member
                .roles
                .iter()
                .filter_map(|rid| g.roles.get(rid).map(|r| r.name.clone()))
                .collect()
        });
        if let Some(names) = cached {
            if !names.is_empty() || member.roles.is_empty() {
                return names;
            }
        }
        match guild_id.roles(&ctx.http).await {
            Ok(map) => member
                .roles
                .iter()
                .filter_map(|rid| map.get(rid).map(|r| r.name.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn reply_ephemeral(ctx: &Context, comp: &ComponentInteraction, text: &str) {
        let _ = comp
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content(text)
                        .ephemeral(true),
                ),
            )
            .await;
    }
}

/// Marca uma identidade como "criação em andamento"; solta no drop.
struct FlightGuard<'a> {
    map: &'a DashMap<String, ()>,
    key: String,
}

impl<'a> FlightGuard<'a> {
    fn try_acquire(map: &'a DashMap<String, ()>, key: String) -> Option<Self> {
        use dashmap::mapref::entry::Entry;
        match map.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self { map, key })
            }
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}
