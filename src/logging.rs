use crate::config::Settings;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

/// Inicializa o tracing. `RUST_LOG` manda quando definido; senão vale o
/// nível do settings, com o serenity contido em warn para o tráfego de
/// gateway não afogar o log. Formato texto simples.
pub fn init(settings: &Settings) {
    let level = settings
        .logging
        .level
        .as_deref()
        .unwrap_or("info");

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},serenity=warn")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}
