use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use url::Url;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub discord: Discord,
    pub server: Server,
    pub webhooks: Webhooks,
    pub channels: Channels,
    pub onboarding: OnboardingConfig,
    pub purchase: PurchaseConfig,
    pub google: GoogleConfig,
    pub paths: Paths,
    pub logging: Logging,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Discord {
    pub token: String,
    pub app_id: Option<String>,
    pub intents: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Server {
    pub port: u16,
}

/// URLs dos fluxos n8n. String vazia = fluxo desligado (logamos e seguimos).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Webhooks {
    #[serde(default)]
    pub jurema_onboarding: String,
    #[serde(default)]
    pub hey_dinastia: String,
    #[serde(default)]
    pub purchase_validation: String,
    #[serde(default)]
    pub support_ranking: String,
    #[serde(default)]
    pub send_thanks: String,
}

/// Ids de canal; 0 = não configurado.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Channels {
    #[serde(default)]
    pub purchase_validation: u64,
    #[serde(default)]
    pub thanks: u64,
    #[serde(default)]
    pub support_ranking: u64,
    #[serde(default)]
    pub doubts_general: u64,
    #[serde(default)]
    pub doubts_ofir: u64,
    #[serde(default)]
    pub doubts_netsar: u64,
    #[serde(default)]
    pub doubts_blacks: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OnboardingConfig {
    /// Nome EXATO da categoria (case-sensitive, como está no servidor).
    pub category: String,
    /// Id da categoria, quando conhecido; 0 cai na busca por nome.
    pub category_id: u64,
    /// Grafias aceitas do canal de entrada (a histórica e a atual).
    pub entry_channels: Vec<String>,
    pub operator: String,
    pub admin_role: String,
    pub idle_minutes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PurchaseConfig {
    #[serde(default)]
    pub api_key: String,
}

/// JSON cru das credenciais OAuth, normalmente injetado por env.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GoogleConfig {
    pub credentials_json: Option<String>,
    pub oauth_token_json: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Paths {
    pub data_dir: String,
    pub temp_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub level: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Qual ambiente?
        let env = std::env::var("DIA_ENV").unwrap_or_else(|_| "development".to_string());

        // Carrega .env.<env> e .env (se existirem)
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        // Valores padrão
        #[derive(Deserialize, Serialize)]
        struct Defaults {
            env: String,
            app: App,
            discord: Discord,
            server: Server,
            webhooks: Webhooks,
            channels: Channels,
            onboarding: OnboardingConfig,
            purchase: PurchaseConfig,
            google: GoogleConfig,
            paths: Paths,
            logging: Logging,
        }

        let defaults = Defaults {
            env: env.clone(),
            app: App {
                name: "Jurema".into(),
            },
            discord: Discord {
                token: "".into(),
                app_id: None,
                intents: vec![
                    "GUILDS".into(),
                    "GUILD_MEMBERS".into(),
                    "GUILD_MESSAGES".into(),
                    "MESSAGE_CONTENT".into(),
                ],
            },
            server: Server { port: 8082 },
            webhooks: Webhooks::default(),
            channels: Channels::default(),
            onboarding: OnboardingConfig {
                category: "onboard".into(),
                category_id: 0,
                entry_channels: vec!["🚀-comece-aqui".into(), "🚀｜comece-aqui".into()],
                operator: "washingtonrodriigues".into(),
                admin_role: "ADMIN".into(),
                idle_minutes: 60,
            },
            purchase: PurchaseConfig::default(),
            google: GoogleConfig::default(),
            paths: Paths {
                data_dir: "data".into(),
                temp_dir: "temp".into(),
            },
            logging: Logging {
                level: Some("info".into()),
            },
        };

        // Camadas: padrão -> TOML -> variáveis DIA_*
        // Separador "__" porque as chaves têm underscore próprio:
        // DIA_WEBHOOKS__HEY_DINASTIA => webhooks.hey_dinastia
        let figment = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(format!("config/{}.toml", env)))
            .merge(Env::prefixed("DIA_").split("__"));

        let mut s: Settings = figment.extract()?;
        s.env = env;

        // Completa o que ficou sem valor utilizável
        if s.onboarding.entry_channels.is_empty() {
            s.onboarding.entry_channels =
                vec!["🚀-comece-aqui".into(), "🚀｜comece-aqui".into()];
        }
        if s.onboarding.idle_minutes == 0 {
            s.onboarding.idle_minutes = 60;
        }

        s.check_webhook_urls()?;
        Ok(s)
    }

    /// Webhook configurado tem que ser URL absoluta; string vazia significa
    /// fluxo desligado e passa direto.
    fn check_webhook_urls(&self) -> Result<()> {
        let entries = [
            ("webhooks.jurema_onboarding", &self.webhooks.jurema_onboarding),
            ("webhooks.hey_dinastia", &self.webhooks.hey_dinastia),
            (
                "webhooks.purchase_validation",
                &self.webhooks.purchase_validation,
            ),
            ("webhooks.support_ranking", &self.webhooks.support_ranking),
            ("webhooks.send_thanks", &self.webhooks.send_thanks),
        ];
        for (key, value) in entries {
            if value.is_empty() {
                continue;
            }
            Url::parse(value).with_context(|| format!("URL inválida em {key}: {value}"))?;
        }
        Ok(())
    }
}
