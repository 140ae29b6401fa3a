use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use jurema::config::OnboardingConfig;
use jurema::locator::{
    ChannelDirectory, ChannelKind, ChannelRecord, MemberChannelSpec, MessagingClient, PanelSpec,
};
use jurema::onboarding::{
    EntryOutcome, LeaveOutcome, Onboarding, OpenOutcome, OpenRequest, START_BUTTON_ID,
};

const CATEGORY: u64 = 1;

fn cfg() -> OnboardingConfig {
    OnboardingConfig {
        category: "onboard".to_string(),
        category_id: 0,
        entry_channels: vec!["🚀-comece-aqui".to_string(), "🚀｜comece-aqui".to_string()],
        operator: "washingtonrodriigues".to_string(),
        admin_role: "ADMIN".to_string(),
        idle_minutes: 60,
    }
}

fn category_record() -> ChannelRecord {
    ChannelRecord {
        id: CATEGORY,
        name: "onboard".to_string(),
        kind: ChannelKind::Category,
        parent_id: None,
        topic: None,
    }
}

fn text(id: u64, name: &str, parent: u64) -> ChannelRecord {
    ChannelRecord {
        id,
        name: name.to_string(),
        kind: ChannelKind::Text,
        parent_id: Some(parent),
        topic: None,
    }
}

/// Guilda em memória que implementa os dois colaboradores do onboarding.
#[derive(Default)]
struct FakeGuild {
    channels: Mutex<Vec<ChannelRecord>>,
    /// canal -> instante da última mensagem; ausente = canal sem mensagens
    activity: Mutex<HashMap<u64, DateTime<Utc>>>,
    fail_activity: Mutex<HashSet<u64>>,
    fail_delete: Mutex<HashSet<u64>>,
    panels: Mutex<Vec<(u64, String)>>,
    texts: Mutex<Vec<(u64, String)>>,
    deleted: Mutex<Vec<u64>>,
    next_id: AtomicU64,
}

impl FakeGuild {
    fn with_channels(channels: Vec<ChannelRecord>) -> Self {
        Self {
            channels: Mutex::new(channels),
            next_id: AtomicU64::new(100),
            ..Default::default()
        }
    }

    fn channel_names(&self) -> Vec<String> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelDirectory for FakeGuild {
    async fn snapshot(&self) -> Result<Vec<ChannelRecord>> {
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn create_entry_channel(
        &self,
        name: &str,
        category: u64,
        topic: &str,
    ) -> Result<ChannelRecord> {
        let rec = ChannelRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            kind: ChannelKind::Text,
            parent_id: Some(category),
            topic: Some(topic.to_string()),
        };
        self.channels.lock().unwrap().push(rec.clone());
        Ok(rec)
    }

    async fn create_member_channel(&self, spec: &MemberChannelSpec) -> Result<ChannelRecord> {
        let rec = ChannelRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: spec.name.clone(),
            kind: ChannelKind::Text,
            parent_id: Some(spec.category),
            topic: Some(spec.topic.clone()),
        };
        self.channels.lock().unwrap().push(rec.clone());
        Ok(rec)
    }

    async fn delete_channel(&self, id: u64) -> Result<()> {
        if self.fail_delete.lock().unwrap().contains(&id) {
            return Err(anyhow!("sem permissão para excluir {id}"));
        }
        self.channels.lock().unwrap().retain(|c| c.id != id);
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for FakeGuild {
    async fn last_activity(&self, channel: u64) -> Result<Option<DateTime<Utc>>> {
        if self.fail_activity.lock().unwrap().contains(&channel) {
            return Err(anyhow!("histórico indisponível para {channel}"));
        }
        Ok(self.activity.lock().unwrap().get(&channel).copied())
    }

    async fn has_welcome_message(&self, channel: u64, button_id: &str) -> Result<bool> {
        Ok(self
            .panels
            .lock()
            .unwrap()
            .iter()
            .any(|(c, b)| *c == channel && b == button_id))
    }

    async fn post_panel(&self, channel: u64, panel: &PanelSpec<'_>) -> Result<()> {
        self.panels
            .lock()
            .unwrap()
            .push((channel, panel.button_id.to_string()));
        Ok(())
    }

    async fn send_text(&self, channel: u64, text: &str) -> Result<()> {
        self.texts.lock().unwrap().push((channel, text.to_string()));
        Ok(())
    }
}

fn request(username: &str, user_id: u64) -> OpenRequest {
    OpenRequest {
        username: username.to_string(),
        user_id,
        admin_role: Some(50),
        operator: Some(60),
    }
}

/* =========================================
   Canal de entrada
   ========================================= */

#[tokio::test]
async fn ensure_entry_creates_channel_and_panel_once() {
    let guild = FakeGuild::with_channels(vec![category_record()]);

    let first = Onboarding::ensure_entry(&guild, &guild, &cfg()).await.unwrap();
    let EntryOutcome::Ready {
        channel,
        created_channel,
        posted_panel,
    } = first
    else {
        panic!("esperava Ready, veio {first:?}");
    };
    assert!(created_channel);
    assert!(posted_panel);
    assert!(guild.channel_names().contains(&"🚀｜comece-aqui".to_string()));
    assert_eq!(guild.panels.lock().unwrap()[0], (channel, START_BUTTON_ID.to_string()));

    // segunda passada: nada muda
    let second = Onboarding::ensure_entry(&guild, &guild, &cfg()).await.unwrap();
    assert_eq!(
        second,
        EntryOutcome::Ready {
            channel,
            created_channel: false,
            posted_panel: false,
        }
    );
    assert_eq!(guild.panels.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn ensure_entry_without_category_is_terminal() {
    let guild = FakeGuild::with_channels(vec![]);
    let outcome = Onboarding::ensure_entry(&guild, &guild, &cfg()).await.unwrap();
    assert_eq!(outcome, EntryOutcome::NoCategory);
    assert!(guild.channel_names().is_empty());
    assert!(guild.panels.lock().unwrap().is_empty());
}

#[tokio::test]
async fn ensure_entry_reuses_legacy_spelling() {
    let guild = FakeGuild::with_channels(vec![
        category_record(),
        text(10, "🚀-comece-aqui", CATEGORY),
    ]);

    let outcome = Onboarding::ensure_entry(&guild, &guild, &cfg()).await.unwrap();
    assert_eq!(
        outcome,
        EntryOutcome::Ready {
            channel: 10,
            created_channel: false,
            posted_panel: true,
        }
    );
    // o canal antigo nunca é renomeado
    assert!(guild.channel_names().contains(&"🚀-comece-aqui".to_string()));
}

/* =========================================
   Canal privado
   ========================================= */

#[tokio::test]
async fn open_private_creates_normalized_channel_with_welcome() {
    let guild = FakeGuild::with_channels(vec![category_record()]);

    let outcome = Onboarding::open_private(&guild, &guild, &cfg(), &request("Ana.Clara", 42))
        .await
        .unwrap();
    let OpenOutcome::Created { channel } = outcome else {
        panic!("esperava Created, veio {outcome:?}");
    };

    let channels = guild.channels.lock().unwrap().clone();
    let created = channels.iter().find(|c| c.id == channel).unwrap();
    assert_eq!(created.name, "anaclara");
    assert_eq!(created.topic.as_deref(), Some("Onboarding de Ana.Clara"));
    assert_eq!(created.parent_id, Some(CATEGORY));

    let texts = guild.texts.lock().unwrap().clone();
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].0, channel);
    assert!(texts[0].1.contains("<@42>"));
}

#[tokio::test]
async fn open_private_dedupes_across_whole_guild() {
    // canal homônimo fora da categoria de onboarding também conta
    let guild = FakeGuild::with_channels(vec![
        category_record(),
        text(20, "johndoe", 99),
    ]);

    let outcome = Onboarding::open_private(&guild, &guild, &cfg(), &request("John.Doe", 7))
        .await
        .unwrap();
    assert_eq!(outcome, OpenOutcome::AlreadyExists { channel: 20 });
    assert!(guild.texts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn open_private_without_category() {
    let guild = FakeGuild::with_channels(vec![]);
    let outcome = Onboarding::open_private(&guild, &guild, &cfg(), &request("ana", 1))
        .await
        .unwrap();
    assert_eq!(outcome, OpenOutcome::NoCategory);
}

/* =========================================
   Varredura de inativos
   ========================================= */

#[tokio::test]
async fn sweep_deletes_idle_and_silent_channels_only() {
    let now = Utc::now();
    let guild = FakeGuild::with_channels(vec![
        category_record(),
        text(10, "🚀｜comece-aqui", CATEGORY), // entrada: nunca varrido
        text(11, "parado", CATEGORY),          // última mensagem há 2h
        text(12, "ativo", CATEGORY),           // última mensagem há 5min
        text(13, "mudo", CATEGORY),            // nenhuma mensagem
        text(14, "de-fora", 99),               // outra categoria
    ]);
    {
        let mut act = guild.activity.lock().unwrap();
        act.insert(11, now - Duration::hours(2));
        act.insert(12, now - Duration::minutes(5));
    }

    let report = Onboarding::sweep(&guild, &guild, &cfg(), now).await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failures, 0);

    let deleted = guild.deleted.lock().unwrap().clone();
    assert!(deleted.contains(&11));
    assert!(deleted.contains(&13));
    assert!(!deleted.contains(&10));
    assert!(!deleted.contains(&12));
    assert!(!deleted.contains(&14));
}

#[tokio::test]
async fn sweep_exactly_at_limit_is_kept() {
    let now = Utc::now();
    let guild = FakeGuild::with_channels(vec![
        category_record(),
        text(11, "no-limite", CATEGORY),
    ]);
    guild
        .activity
        .lock()
        .unwrap()
        .insert(11, now - Duration::minutes(60));

    let report = Onboarding::sweep(&guild, &guild, &cfg(), now).await.unwrap();
    // 60min é o limite, não passou do limite
    assert_eq!(report.deleted, 0);
}

#[tokio::test]
async fn sweep_continues_after_per_channel_failures() {
    let now = Utc::now();
    let guild = FakeGuild::with_channels(vec![
        category_record(),
        text(11, "quebrado", CATEGORY),
        text(12, "sem-historico", CATEGORY),
        text(13, "tambem-parado", CATEGORY),
    ]);
    guild.activity.lock().unwrap().insert(11, now - Duration::hours(3));
    guild.fail_delete.lock().unwrap().insert(11);
    guild.fail_activity.lock().unwrap().insert(12);
    guild.activity.lock().unwrap().insert(13, now - Duration::hours(3));

    let report = Onboarding::sweep(&guild, &guild, &cfg(), now).await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.failures, 2);
    assert_eq!(guild.deleted.lock().unwrap().clone(), vec![13]);
}

/* =========================================
   Saída de membro
   ========================================= */

#[tokio::test]
async fn leaver_channel_found_by_name() {
    let guild = FakeGuild::with_channels(vec![
        category_record(),
        text(21, "anaclara", CATEGORY),
    ]);

    let outcome = Onboarding::remove_for_leaver(&guild, &cfg(), "Ana.Clara")
        .await
        .unwrap();
    assert_eq!(outcome, LeaveOutcome::Deleted { channel: 21 });
    assert_eq!(guild.deleted.lock().unwrap().clone(), vec![21]);
}

#[tokio::test]
async fn leaver_channel_found_by_topic_fallback() {
    let mut legacy = text(22, "canal-legado", CATEGORY);
    legacy.topic = Some("Onboarding de Zé.Roberto".to_string());
    let guild = FakeGuild::with_channels(vec![category_record(), legacy]);

    let outcome = Onboarding::remove_for_leaver(&guild, &cfg(), "Zé.Roberto")
        .await
        .unwrap();
    assert_eq!(outcome, LeaveOutcome::Deleted { channel: 22 });
}

#[tokio::test]
async fn leaver_without_channel_is_a_non_event() {
    let guild = FakeGuild::with_channels(vec![
        category_record(),
        text(23, "outromembro", CATEGORY),
    ]);

    let outcome = Onboarding::remove_for_leaver(&guild, &cfg(), "Fulano")
        .await
        .unwrap();
    assert_eq!(outcome, LeaveOutcome::NotFound);
    assert!(guild.deleted.lock().unwrap().is_empty());
}
