// src/cron.rs

use std::sync::Arc;

use serenity::all::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::ranking::Ranking;
use crate::AppContext;

/// Seis campos (com segundos): toda hora cheia.
const HOURLY_SWEEP: &str = "0 0 * * * *";
/// 07:00 no fuso de São Paulo, independente do relógio do host.
const DAILY_RANKING: &str = "0 0 7 * * *";

pub async fn start(ctx: Context, app: Arc<AppContext>) -> anyhow::Result<()> {
    let scheduler = JobScheduler::new().await?;

    let sweep_ctx = ctx.clone();
    let sweep_app = app.clone();
    let sweep = Job::new_async(HOURLY_SWEEP, move |_uuid, _lock| {
        let ctx = sweep_ctx.clone();
        let app = sweep_app.clone();
        Box::pin(async move {
            info!("⏰ iniciando varredura de canais de onboarding inativos");
            for guild_id in ctx.cache.guilds() {
                app.onboarding().sweep_guild(&ctx, guild_id).await;
            }
        })
    })?;
    scheduler.add(sweep).await?;

    let rank_ctx = ctx;
    let rank_app = app;
    let ranking = Job::new_async_tz(
        DAILY_RANKING,
        chrono_tz::America::Sao_Paulo,
        move |_uuid, _lock| {
            let ctx = rank_ctx.clone();
            let app = rank_app.clone();
            Box::pin(async move {
                Ranking::post_daily(&ctx, &app).await;
            })
        },
    )?;
    scheduler.add(ranking).await?;

    scheduler.start().await?;
    info!("📅 agendador iniciado (varredura horária, ranking diário às 07:00 America/Sao_Paulo)");
    Ok(())
}
