use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{
    ButtonKind, ButtonStyle, ChannelId, ChannelType, Colour, Context, GuildChannel, GuildId,
    PermissionOverwrite, PermissionOverwriteType, Permissions, RoleId, UserId,
};
use serenity::builder::{
    CreateActionRow, CreateButton, CreateChannel, CreateEmbed, CreateEmbedFooter, CreateMessage,
    GetMessages,
};

use crate::normalize;

/* =========================================
   Modelo
   ========================================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Category,
    Text,
    Other,
}

/// Snapshot de um canal como o localizador enxerga.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub id: u64,
    pub name: String,
    pub kind: ChannelKind,
    pub parent_id: Option<u64>,
    pub topic: Option<String>,
}

/// Pedido de criação do canal privado de um membro.
#[derive(Debug, Clone)]
pub struct MemberChannelSpec {
    pub name: String,
    pub topic: String,
    pub category: u64,
    pub member: u64,
    pub admin_role: Option<u64>,
    pub operator: Option<u64>,
}

/// Conteúdo de um painel fixo (embed + botão) que o adaptador renderiza.
#[derive(Debug, Clone, Copy)]
pub struct PanelSpec<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub colour: u32,
    pub footer_text: &'a str,
    pub footer_icon: &'a str,
    pub button_id: &'a str,
    pub button_label: &'a str,
    pub button_emoji: Option<char>,
}

/* =========================================
   Buscas puras
   ========================================= */

/// Categoria por nome EXATO (case-sensitive, como o servidor a configurou).
pub fn find_category<'a>(channels: &'a [ChannelRecord], name: &str) -> Option<&'a ChannelRecord> {
    channels
        .iter()
        .find(|c| c.kind == ChannelKind::Category && c.name == name)
}

/// Canal de entrada dentro da categoria, aceitando qualquer grafia conhecida.
pub fn find_entry_channel<'a>(
    channels: &'a [ChannelRecord],
    category: u64,
    names: &[String],
) -> Option<&'a ChannelRecord> {
    channels.iter().find(|c| {
        c.kind == ChannelKind::Text
            && c.parent_id == Some(category)
            && names.iter().any(|n| *n == c.name)
    })
}

/// Canal já pertencente à identidade, em qualquer lugar da guilda
/// (deduplicação na abertura do onboarding).
pub fn find_channel_for_user<'a>(
    channels: &'a [ChannelRecord],
    username: &str,
) -> Option<&'a ChannelRecord> {
    channels.iter().find(|c| normalize::matches(&c.name, username))
}

/// Canal do membro dentro da categoria, para limpeza quando ele sai:
/// primeiro por nome normalizado, depois por tópico contendo a identidade.
pub fn find_leave_channel<'a>(
    channels: &'a [ChannelRecord],
    category: u64,
    username: &str,
) -> Option<&'a ChannelRecord> {
    let in_category = |c: &&ChannelRecord| {
        c.kind == ChannelKind::Text && c.parent_id == Some(category)
    };
    channels
        .iter()
        .filter(in_category)
        .find(|c| normalize::matches(&c.name, username))
        .or_else(|| {
            channels
                .iter()
                .filter(in_category)
                .find(|c| c.topic.as_deref().is_some_and(|t| t.contains(username)))
        })
}

/* =========================================
   Traits dos colaboradores
   ========================================= */

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// Snapshot fresco de todos os canais da guilda.
    async fn snapshot(&self) -> Result<Vec<ChannelRecord>>;

    /// Cria o canal de entrada (visível a todos, escrita bloqueada).
    async fn create_entry_channel(
        &self,
        name: &str,
        category: u64,
        topic: &str,
    ) -> Result<ChannelRecord>;

    /// Cria o canal privado de um membro com os overwrites do pedido.
    async fn create_member_channel(&self, spec: &MemberChannelSpec) -> Result<ChannelRecord>;

    async fn delete_channel(&self, id: u64) -> Result<()>;
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Timestamp da mensagem mais recente entre as últimas 10, se houver.
    async fn last_activity(&self, channel: u64) -> Result<Option<DateTime<Utc>>>;

    /// O painel (botão com `button_id`) já está entre as últimas 10 mensagens?
    async fn has_welcome_message(&self, channel: u64, button_id: &str) -> Result<bool>;

    async fn post_panel(&self, channel: u64, panel: &PanelSpec<'_>) -> Result<()>;

    async fn send_text(&self, channel: u64, text: &str) -> Result<()>;
}

/* =========================================
   Implementação serenity
   ========================================= */

const SCAN_LIMIT: u8 = 10;

pub struct GuildDirectory<'a> {
    pub ctx: &'a Context,
    pub guild_id: GuildId,
}

impl<'a> GuildDirectory<'a> {
    pub fn new(ctx: &'a Context, guild_id: GuildId) -> Self {
        Self { ctx, guild_id }
    }

    fn record_from(ch: &GuildChannel) -> ChannelRecord {
        let kind = match ch.kind {
            ChannelType::Category => ChannelKind::Category,
            ChannelType::Text => ChannelKind::Text,
            _ => ChannelKind::Other,
        };
        ChannelRecord {
            id: ch.id.get(),
            name: ch.name.clone(),
            kind,
            parent_id: ch.parent_id.map(|p| p.get()),
            topic: ch.topic.clone(),
        }
    }

    /// @everyone enxerga mas não escreve no canal de entrada.
    fn entry_overwrites(&self) -> Vec<PermissionOverwrite> {
        vec![PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL | Permissions::READ_MESSAGE_HISTORY,
            deny: Permissions::SEND_MESSAGES,
            kind: PermissionOverwriteType::Role(RoleId::new(self.guild_id.get())),
        }]
    }

    /// Canal privado: @everyone não vê; o membro vê e escreve; ADM e operador veem.
    fn member_overwrites(&self, spec: &MemberChannelSpec) -> Vec<PermissionOverwrite> {
        let mut ov = vec![
            PermissionOverwrite {
                allow: Permissions::empty(),
                deny: Permissions::VIEW_CHANNEL,
                kind: PermissionOverwriteType::Role(RoleId::new(self.guild_id.get())),
            },
            PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(UserId::new(spec.member)),
            },
        ];
        if let Some(rid) = spec.admin_role {
            ov.push(PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Role(RoleId::new(rid)),
            });
        }
        if let Some(uid) = spec.operator {
            ov.push(PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(UserId::new(uid)),
            });
        }
        ov
    }

    async fn recent_messages(
        &self,
        channel: u64,
    ) -> Result<Vec<serenity::model::channel::Message>> {
        ChannelId::new(channel)
            .messages(&self.ctx.http, GetMessages::new().limit(SCAN_LIMIT))
            .await
            .with_context(|| format!("lendo mensagens do canal {channel}"))
    }
}

#[async_trait]
impl ChannelDirectory for GuildDirectory<'_> {
    async fn snapshot(&self) -> Result<Vec<ChannelRecord>> {
        let map = self
            .guild_id
            .channels(&self.ctx.http)
            .await
            .context("listando canais da guilda")?;
        Ok(map.values().map(Self::record_from).collect())
    }

    async fn create_entry_channel(
        &self,
        name: &str,
        category: u64,
        topic: &str,
    ) -> Result<ChannelRecord> {
        let created: GuildChannel = self
            .guild_id
            .create_channel(
                &self.ctx.http,
                CreateChannel::new(name)
                    .kind(ChannelType::Text)
                    .category(ChannelId::new(category))
                    .topic(topic)
                    .permissions(self.entry_overwrites()),
            )
            .await
            .with_context(|| format!("criando canal de entrada {name}"))?;
        Ok(Self::record_from(&created))
    }

    async fn create_member_channel(&self, spec: &MemberChannelSpec) -> Result<ChannelRecord> {
        let created: GuildChannel = self
            .guild_id
            .create_channel(
                &self.ctx.http,
                CreateChannel::new(spec.name.as_str())
                    .kind(ChannelType::Text)
                    .category(ChannelId::new(spec.category))
                    .topic(spec.topic.as_str())
                    .permissions(self.member_overwrites(spec)),
            )
            .await
            .with_context(|| format!("criando canal privado {}", spec.name))?;
        Ok(Self::record_from(&created))
    }

    async fn delete_channel(&self, id: u64) -> Result<()> {
        ChannelId::new(id)
            .delete(&self.ctx.http)
            .await
            .with_context(|| format!("excluindo canal {id}"))?;
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for GuildDirectory<'_> {
    async fn last_activity(&self, channel: u64) -> Result<Option<DateTime<Utc>>> {
        let msgs = self.recent_messages(channel).await?;
        let newest = msgs
            .iter()
            .map(|m| m.timestamp.unix_timestamp())
            .max()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        Ok(newest)
    }

    async fn has_welcome_message(&self, channel: u64, button_id: &str) -> Result<bool> {
        let msgs = self.recent_messages(channel).await?;
        let found = msgs.iter().any(|m| {
            m.components.iter().any(|row| {
                row.components.iter().any(|comp| match comp {
                    serenity::all::ActionRowComponent::Button(b) => match &b.data {
                        ButtonKind::NonLink { custom_id, .. } => custom_id == button_id,
                        _ => false,
                    },
                    _ => false,
                })
            })
        });
        Ok(found)
    }

    async fn post_panel(&self, channel: u64, panel: &PanelSpec<'_>) -> Result<()> {
        let embed = CreateEmbed::new()
            .title(panel.title)
            .description(panel.description)
            .colour(Colour::new(panel.colour))
            .footer(CreateEmbedFooter::new(panel.footer_text).icon_url(panel.footer_icon));
        let mut button = CreateButton::new(panel.button_id)
            .label(panel.button_label)
            .style(ButtonStyle::Primary);
        if let Some(emoji) = panel.button_emoji {
            button = button.emoji(emoji);
        }
        let btn_row = CreateActionRow::Buttons(vec![button]);
        ChannelId::new(channel)
            .send_message(
                &self.ctx.http,
                CreateMessage::new().embed(embed).components(vec![btn_row]),
            )
            .await
            .with_context(|| format!("publicando painel no canal {channel}"))?;
        Ok(())
    }

    async fn send_text(&self, channel: u64, text: &str) -> Result<()> {
        ChannelId::new(channel)
            .send_message(&self.ctx.http, CreateMessage::new().content(text))
            .await
            .with_context(|| format!("enviando mensagem no canal {channel}"))?;
        Ok(())
    }
}

/* =========================================
   Testes
   ========================================= */
