use anyhow::{Context, Result};
use porchlight_core::{DetectionPolicy, DistanceMatcher, GreetingTrigger, SystemClock};
use porchlight_store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod greeter;
mod schedule;
mod speech;

use config::Config;
use dbus_interface::{PorchlightService, BUS_NAME, OBJECT_PATH};
use engine::EngineSettings;
use greeter::Greeter;
use schedule::NightlySchedule;
use speech::{CommandSpeaker, LogSpeaker, Speaker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("porchlightd starting");

    let config = Config::load().context("failed to load configuration")?;
    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    let engine = engine::spawn_engine(
        store,
        SystemClock,
        EngineSettings {
            detector: config.detector.clone(),
            policy: DetectionPolicy {
                min_confidence: config.min_confidence,
                duplicate_window: config.duplicate_window(),
            },
            matcher: DistanceMatcher {
                threshold: config.face_match_threshold,
            },
            recompute_on_arrival: config.recompute_on_arrival,
        },
    )
    .context("failed to start engine")?;

    let schedule =
        NightlySchedule::routine_recompute(chrono::Local::now().naive_local(), config.recompute_at(), engine.clone());

    let greeter = if config.greeting_enabled {
        let speaker: Arc<dyn Speaker> = match config.tts_command.as_deref() {
            Some(cmd) => Arc::new(CommandSpeaker::parse(cmd).context("invalid tts_command")?),
            None => Arc::new(LogSpeaker),
        };
        let trigger = GreetingTrigger::new(SystemClock, config.user_name.clone())
            .with_cooldown(config.greeting_cooldown());
        let greeter = Greeter::new(engine.clone(), trigger, speaker, config.greeting_volume);
        Some(greeter.spawn(config.greeting_poll_interval()))
    } else {
        tracing::info!("greetings disabled");
        None
    };

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, PorchlightService::new(engine, schedule.subscribe()))?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!(bus = BUS_NAME, "porchlightd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("porchlightd shutting down");

    schedule.dispose();
    tracing::debug!(schedule = ?schedule.state(), "schedule stopped");
    if let Some(task) = greeter {
        task.abort();
    }

    Ok(())
}
