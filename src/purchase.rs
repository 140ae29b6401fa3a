use anyhow::{Context as _, Result};
use reqwest::StatusCode;
use serde::Serialize;
use serenity::all::{
    ActionRowComponent, ButtonStyle, ChannelId, Colour, ComponentInteraction, Context,
    InputTextStyle, Interaction, ModalInteraction,
};
use serenity::builder::{
    CreateActionRow, CreateButton, CreateEmbed, CreateInputText, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, CreateModal, EditInteractionResponse,
    GetMessages,
};

use crate::AppContext;

pub const REQUEST_BUTTON_ID: &str = "email_request";
pub const EMAIL_MODAL_ID: &str = "email_form";
const EMAIL_INPUT_ID: &str = "email";

const PANEL_SCAN_LIMIT: u8 = 50;

const WELCOME_TITLE: &str = "DinastIA: Validar compra!";
const WELCOME_DESCRIPTION: &str =
    "Se você adquiriu um produto da DinastIA, clique no botão abaixo.";
const WELCOME_FIELD_TITLE: &str = "Orientações:";
const WELCOME_FIELD_VALUE: &str =
    "Clique no botão \"Solicitar Verificação\" para começar.";
const THUMBNAIL_URL: &str = "https://via.placeholder.com/100";

const MSG_PROCESSING: &str = "Aguarde enquanto verificamos seu email.";
const MSG_SUCCESS: &str =
    "Seu email foi verificado com sucesso! Seja bem vindo(a) DinastIA!";
const MSG_ERROR_VALIDATION: &str = "Infelizmente não conseguimos verificar seu email. Por favor, confirme se o seus dados estão corretos, tente novamente ou chame um membro de nossa equipe.";
const MSG_ERROR_FORM: &str =
    "Ocorreu um erro ao abrir o formulário. Por favor, tente novamente.";

#[derive(Serialize)]
struct VerifyRequest<'a> {
    email: &'a str,
    #[serde(rename = "discordId")]
    discord_id: String,
    username: &'a str,
}

fn processing_embed() -> CreateEmbed {
    CreateEmbed::new()
        .title("Processando")
        .description(MSG_PROCESSING)
        .colour(Colour::GOLD)
}

fn success_embed() -> CreateEmbed {
    CreateEmbed::new()
        .title("Aprovado")
        .description(MSG_SUCCESS)
        .colour(Colour::DARK_GREEN)
}

fn denied_embed() -> CreateEmbed {
    CreateEmbed::new()
        .title("Negado")
        .description(MSG_ERROR_VALIDATION)
        .colour(Colour::RED)
}

fn error_embed() -> CreateEmbed {
    CreateEmbed::new()
        .title("Erro")
        .description(MSG_ERROR_VALIDATION)
        .colour(Colour::RED)
}

pub struct Purchase;

impl Purchase {
    /* ======================
       Painel fixo
       ====================== */

    /// Garante o painel de validação no canal configurado. Idempotente: se já
    /// há uma mensagem do bot com o mesmo título e botão entre as últimas 50,
    /// nada é enviado.
    pub async fn ensure_panel(ctx: &Context, app: &AppContext) -> Result<()> {
        let channel_id = app.settings.channels.purchase_validation;
        if channel_id == 0 {
            tracing::warn!("canal de validação de compra não configurado; painel pulado");
            return Ok(());
        }
        let channel = ChannelId::new(channel_id);
        let bot_id = ctx.cache.current_user().id;

        let messages = channel
            .messages(&ctx.http, GetMessages::new().limit(PANEL_SCAN_LIMIT))
            .await
            .context("lendo mensagens do canal de validação")?;

        let already_there = messages.iter().any(|m| {
            m.author.id == bot_id
                && m.embeds
                    .first()
                    .and_then(|e| e.title.as_deref())
                    .is_some_and(|t| t == WELCOME_TITLE)
                && !m.components.is_empty()
        });
        if already_there {
            tracing::info!("Mensagem de validação já existe no canal. Não será enviada novamente.");
            return Ok(());
        }

        let embed = CreateEmbed::new()
            .title(WELCOME_TITLE)
            .description(WELCOME_DESCRIPTION)
            .field(WELCOME_FIELD_TITLE, WELCOME_FIELD_VALUE, false)
            .thumbnail(THUMBNAIL_URL);
        let row = CreateActionRow::Buttons(vec![
            CreateButton::new(REQUEST_BUTTON_ID)
                .label("Solicitar Verificação")
                .style(ButtonStyle::Primary)
                .emoji('✨'),
        ]);
        channel
            .send_message(&ctx.http, CreateMessage::new().embed(embed).components(vec![row]))
            .await
            .context("enviando painel de validação")?;
        tracing::info!("Mensagem inicial de validação enviada com sucesso!");
        Ok(())
    }

    /* ======================
       Interações
       ====================== */

    pub async fn on_interaction(ctx: &Context, app: &AppContext, interaction: &Interaction) {
        if let Some(comp) = interaction.clone().message_component() {
            if comp.data.custom_id == REQUEST_BUTTON_ID {
                Self::on_request_button(ctx, &comp).await;
            }
            return;
        }
        if let Some(modal) = interaction.clone().modal_submit() {
            if modal.data.custom_id == EMAIL_MODAL_ID {
                Self::on_email_modal(ctx, app, &modal).await;
            }
        }
    }

    async fn on_request_button(ctx: &Context, comp: &ComponentInteraction) {
        let modal = CreateModal::new(EMAIL_MODAL_ID, "Verificação de Email de Compra")
            .components(vec![CreateActionRow::InputText(
                CreateInputText::new(
                    InputTextStyle::Short,
                    "Digite o email usado na compra.",
                    EMAIL_INPUT_ID,
                )
                .placeholder("exemplo@email.com")
                .required(true),
            )]);

        if let Err(e) = comp
            .create_response(&ctx.http, CreateInteractionResponse::Modal(modal))
            .await
        {
            tracing::error!(error = ?e, "Erro ao mostrar modal");
            let _ = comp
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content(MSG_ERROR_FORM)
                            .ephemeral(true),
                    ),
                )
                .await;
        }
    }

    async fn on_email_modal(ctx: &Context, app: &AppContext, modal: &ModalInteraction) {
        // extrai o valor do InputText
        let mut email: Option<String> = None;
        for row in &modal.data.components {
            for comp in &row.components {
                if let ActionRowComponent::InputText(input) = comp {
                    if input.custom_id == EMAIL_INPUT_ID {
                        if let Some(v) = &input.value {
                            email = Some(v.trim().to_string());
                        }
                    }
                }
            }
        }
        let Some(email) = email.filter(|e| !e.is_empty()) else {
            let _ = modal
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content(MSG_ERROR_VALIDATION)
                            .ephemeral(true),
                    ),
                )
                .await;
            return;
        };

        if modal.defer_ephemeral(&ctx.http).await.is_err() {
            return;
        }
        let _ = modal
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new().embed(processing_embed()),
            )
            .await;

        let verdict = Self::verify_email(
            app,
            &email,
            modal.user.id.get(),
            &modal.user.name,
        )
        .await;

        let embed = match verdict {
            Ok(StatusCode::OK) => success_embed(),
            Ok(StatusCode::NOT_FOUND) => denied_embed(),
            Ok(status) => {
                tracing::error!(%status, "verificação de email com status inesperado");
                error_embed()
            }
            Err(e) => {
                tracing::error!(error = ?e, "Erro na verificação de email");
                error_embed()
            }
        };
        let _ = modal
            .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
            .await;
    }

    /// POST autenticado para o fluxo de verificação; devolve o status cru.
    async fn verify_email(
        app: &AppContext,
        email: &str,
        discord_id: u64,
        username: &str,
    ) -> Result<StatusCode> {
        let url = &app.settings.webhooks.purchase_validation;
        anyhow::ensure!(!url.is_empty(), "webhook purchase_validation não configurado");

        let body = VerifyRequest {
            email,
            discord_id: discord_id.to_string(),
            username,
        };
        let resp = app
            .http
            .post(url)
            .header("Authorization", &app.settings.purchase.api_key)
            .json(&body)
            .send()
            .await
            .context("Erro na requisição do webhook")?;
        Ok(resp.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_request_wire_field_names() {
        let body = VerifyRequest {
            email: "a@b.com",
            discord_id: 42.to_string(),
            username: "ana",
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["email"], "a@b.com");
        assert_eq!(v["discordId"], "42");
        assert_eq!(v["username"], "ana");
    }
}
