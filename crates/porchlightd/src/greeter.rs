//! Greeting poller: periodically asks the engine whether the user is due and
//! speaks a greeting when the trigger fires.

use crate::engine::{EngineError, EngineHandle};
use crate::speech::Speaker;
use porchlight_core::{Clock, Greeting, GreetingTrigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct Greeter<C> {
    engine: EngineHandle,
    trigger: GreetingTrigger<C>,
    speaker: Arc<dyn Speaker>,
    volume: f32,
}

impl<C: Clock + 'static> Greeter<C> {
    pub fn new(engine: EngineHandle, trigger: GreetingTrigger<C>, speaker: Arc<dyn Speaker>, volume: f32) -> Self {
        Self {
            engine,
            trigger,
            speaker,
            volume,
        }
    }

    /// One poll: greet if the user is inside the routine window and the
    /// cooldown has elapsed.
    pub async fn poll_once(&mut self) -> Result<Option<Greeting>, EngineError> {
        let in_window = self.engine.in_window().await?;
        let Some(greeting) = self.trigger.check(in_window) else {
            return Ok(None);
        };

        if let Err(err) = self.speaker.speak(&greeting.message, self.volume) {
            tracing::warn!(error = %err, "failed to speak greeting");
        }
        self.engine.record_greeting(greeting.clone()).await?;
        Ok(Some(greeting))
    }

    /// Poll every `period` until the task is aborted.
    pub fn spawn(mut self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.poll_once().await {
                    Ok(_) => {}
                    Err(EngineError::ChannelClosed) => {
                        tracing::info!("engine gone; greeting poller stopping");
                        break;
                    }
                    Err(err) => tracing::warn!(error = %err, "greeting poll failed"),
                }
            }
        })
    }
}
