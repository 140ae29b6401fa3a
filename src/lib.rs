// src/lib.rs

pub mod agent;
pub mod config;
pub mod cron;
pub mod discord;
pub mod google;
pub mod heydinastia;
pub mod locator;
pub mod logging;
pub mod normalize;
pub mod onboarding;
pub mod purchase;
pub mod ranking;
pub mod server;
pub mod store;
pub mod uploader;

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::sync::Arc;

use agent::{AgentClient, RetryPolicy};
use config::Settings;
use google::{GoogleAuth, GoogleDrive, YoutubeClient};
use onboarding::Onboarding;
use store::FileStore;
use uploader::Uploader;

/// Contexto global da aplicação.
/// Guarda a configuração, o HTTP compartilhado e os serviços prontos
/// (onboarding, uploader Drive -> YouTube).
#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<FileStore>,
    pub http: reqwest::Client,
    pub agent: AgentClient,
    /// None quando as credenciais OAuth não foram configuradas; o webhook
    /// responde erro de configuração nesse caso.
    pub uploader: Option<Arc<Uploader>>,
    onboarding: OnceCell<Arc<Onboarding>>,
}

impl AppContext {
    /// Bootstrap da aplicação inteira:
    /// - logs
    /// - cliente HTTP compartilhado
    /// - livro-razão de arquivos processados
    /// - clientes Google, quando houver credenciais
    /// - serviço de onboarding dentro do OnceCell
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        // 1) logs
        logging::init(&settings);

        // 2) HTTP compartilhado (webhooks n8n, Google, validação de compra)
        let http = reqwest::Client::builder()
            .user_agent(concat!("Jurema/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        // 3) serviços de base
        let agent = AgentClient::new(RetryPolicy::default())?;
        let store = Arc::new(FileStore::new(&settings.paths.data_dir));

        // 4) Google: sem credenciais o restante do bot segue funcionando
        let uploader = match GoogleAuth::from_config(&settings.google, http.clone()) {
            Ok(Some(auth)) => {
                let auth = Arc::new(auth);
                let drive = Arc::new(GoogleDrive::new(auth.clone(), http.clone()));
                let host = Arc::new(YoutubeClient::new(auth, http.clone()));
                Some(Arc::new(Uploader::new(
                    store.clone(),
                    drive,
                    host,
                    &settings.paths.temp_dir,
                )))
            }
            Ok(None) => {
                tracing::warn!(
                    "credenciais OAuth ausentes (DIA_GOOGLE__CREDENTIALS_JSON); uploader desligado"
                );
                None
            }
            Err(e) => {
                tracing::error!(error = ?e, "credenciais OAuth inválidas; uploader desligado");
                None
            }
        };

        // 5) contexto (OnceCell vazio por enquanto)
        let ctx = Arc::new(Self {
            settings,
            store,
            http,
            agent,
            uploader,
            onboarding: OnceCell::new(),
        });

        // 6) onboarding
        let ob = Onboarding::new(ctx.clone());
        let _ = ctx.onboarding.set(ob); // set() só pode ser chamado uma vez

        Ok(ctx)
    }

    /// Getter cômodo: o serviço de onboarding (Arc).
    pub fn onboarding(&self) -> Arc<Onboarding> {
        self.onboarding
            .get()
            .expect("Onboarding not initialized")
            .clone()
    }
}

/// Sobe o servidor webhook em paralelo e entrega o processo ao gateway do
/// Discord. Quando o gateway encerra, o processo encerra.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let web = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = server::serve(web).await {
            tracing::error!(error = ?e, "servidor webhook caiu");
        }
    });

    discord::run_bot(ctx).await
}
