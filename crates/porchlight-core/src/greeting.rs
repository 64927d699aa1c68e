//! Greeting trigger: decides when to greet and what to say.

use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Local, TimeDelta, Timelike};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum wall-clock time between two greetings.
pub const GREETING_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Part of the day a greeting is phrased for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DayPeriod {
    /// 05:00 to 08:00
    EarlyMorning,
    /// 08:00 to 12:00
    Morning,
    /// 12:00 to 17:00
    Afternoon,
    /// 17:00 to 21:00
    Evening,
    /// 21:00 to 05:00
    LateNight,
}

impl DayPeriod {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=7 => Self::EarlyMorning,
            8..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=20 => Self::Evening,
            _ => Self::LateNight,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EarlyMorning => "early-morning",
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::LateNight => "late-night",
        }
    }

    /// Candidate messages; `{name}` is replaced with the user's name.
    fn templates(self, named: bool) -> &'static [&'static str] {
        match (self, named) {
            (Self::EarlyMorning, true) => &[
                "Good morning, {name}! You're up early!",
                "Early bird catches the worm! Good morning!",
                "Rise and shine!",
            ],
            (Self::EarlyMorning, false) => &[
                "Good morning! You're up early!",
                "Early bird catches the worm! Good morning!",
                "Rise and shine!",
            ],
            (Self::Morning, true) => &["Good morning, {name}!", "Morning, {name}!", "Hello there!"],
            (Self::Morning, false) => &["Good morning!", "Morning!", "Hello there!"],
            (Self::Afternoon, true) => &["Hello, {name}!", "Welcome back, {name}!", "Good afternoon!"],
            (Self::Afternoon, false) => &["Hello!", "Welcome back!", "Good afternoon!"],
            (Self::Evening, true) => &[
                "Welcome back, {name}!",
                "Good evening, {name}!",
                "How was your day?",
            ],
            (Self::Evening, false) => &["Welcome back!", "Good evening!", "How was your day?"],
            (Self::LateNight, _) => &["Late night arrival detected!", "You're up late!", "Welcome home!"],
        }
    }
}

/// A greeting that was fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Greeting {
    pub message: String,
    pub timestamp: DateTime<Local>,
    #[serde(rename = "timeOfDay")]
    pub period: DayPeriod,
}

/// Fires a greeting when the user is inside the routine window, at most once
/// per cooldown. The cooldown is measured on the wall clock.
pub struct GreetingTrigger<C = SystemClock> {
    clock: C,
    cooldown: Duration,
    user_name: Option<String>,
    last_greeting: Option<DateTime<Local>>,
}

impl<C: Clock> GreetingTrigger<C> {
    pub fn new(clock: C, user_name: Option<String>) -> Self {
        Self {
            clock,
            cooldown: GREETING_COOLDOWN,
            user_name: user_name.filter(|n| !n.trim().is_empty()),
            last_greeting: None,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn last_greeting(&self) -> Option<DateTime<Local>> {
        self.last_greeting
    }

    /// Greet if `in_window` and the cooldown has elapsed.
    pub fn check(&mut self, in_window: bool) -> Option<Greeting> {
        if !in_window || !self.can_greet_now() {
            return None;
        }
        Some(self.greet())
    }

    /// Greet unconditionally and restart the cooldown.
    pub fn greet(&mut self) -> Greeting {
        let now = self.clock.now();
        let period = DayPeriod::from_hour(now.hour());
        let message = self.compose(period);

        self.last_greeting = Some(now);
        tracing::info!(period = period.as_str(), text = %message, "greeting fired");

        Greeting {
            message,
            timestamp: now,
            period,
        }
    }

    fn can_greet_now(&self) -> bool {
        let Some(last) = self.last_greeting else {
            return true;
        };
        let cooldown = TimeDelta::from_std(self.cooldown).unwrap_or(TimeDelta::MAX);
        self.clock.now().signed_duration_since(last) >= cooldown
    }

    fn compose(&self, period: DayPeriod) -> String {
        let templates = period.templates(self.user_name.is_some());
        let template = templates
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("Welcome home!");
        match &self.user_name {
            Some(name) => template.replace("{name}", name),
            None => template.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 27, h, m, 0).unwrap()
    }

    #[test]
    fn test_day_periods() {
        assert_eq!(DayPeriod::from_hour(4), DayPeriod::LateNight);
        assert_eq!(DayPeriod::from_hour(5), DayPeriod::EarlyMorning);
        assert_eq!(DayPeriod::from_hour(8), DayPeriod::Morning);
        assert_eq!(DayPeriod::from_hour(12), DayPeriod::Afternoon);
        assert_eq!(DayPeriod::from_hour(17), DayPeriod::Evening);
        assert_eq!(DayPeriod::from_hour(21), DayPeriod::LateNight);
    }

    #[test]
    fn test_check_outside_window_never_greets() {
        let mut trigger = GreetingTrigger::new(ManualClock::new(at(17, 30)), None);
        assert!(trigger.check(false).is_none());
        assert!(trigger.last_greeting().is_none());
    }

    #[test]
    fn test_cooldown_between_greetings() {
        let clock = ManualClock::new(at(17, 30));
        let mut trigger = GreetingTrigger::new(clock.clone(), None);

        let first = trigger.check(true).unwrap();
        assert_eq!(first.timestamp, at(17, 30));
        assert_eq!(first.period, DayPeriod::Evening);

        clock.advance(TimeDelta::minutes(4));
        assert!(trigger.check(true).is_none());

        clock.advance(TimeDelta::minutes(1));
        let second = trigger.check(true).unwrap();
        assert_eq!(second.timestamp, at(17, 35));
        assert_eq!(trigger.last_greeting(), Some(at(17, 35)));
    }

    #[test]
    fn test_greet_resets_cooldown() {
        let clock = ManualClock::new(at(9, 0));
        let mut trigger = GreetingTrigger::new(clock.clone(), None);
        trigger.greet();
        clock.advance(TimeDelta::minutes(1));
        assert!(trigger.check(true).is_none());
    }

    #[test]
    fn test_custom_cooldown() {
        let clock = ManualClock::new(at(9, 0));
        let mut trigger = GreetingTrigger::new(clock.clone(), None).with_cooldown(Duration::from_secs(30));
        trigger.greet();
        clock.advance(TimeDelta::seconds(30));
        assert!(trigger.check(true).is_some());
    }

    #[test]
    fn test_message_uses_name() {
        let mut trigger = GreetingTrigger::new(ManualClock::new(at(9, 0)), Some("Sam".into()));
        for _ in 0..10 {
            let msg = trigger.greet().message;
            assert!(!msg.contains("{name}"), "unfilled template: {msg}");
            assert!(DayPeriod::Morning.templates(true).iter().any(|t| t.replace("{name}", "Sam") == msg));
        }
    }

    #[test]
    fn test_message_without_name() {
        let mut trigger = GreetingTrigger::new(ManualClock::new(at(23, 0)), Some("  ".into()));
        let greeting = trigger.greet();
        assert_eq!(greeting.period, DayPeriod::LateNight);
        assert!(!greeting.message.contains("{name}"));
    }

    #[test]
    fn test_greeting_json_shape() {
        let mut trigger = GreetingTrigger::new(ManualClock::new(at(6, 0)), None);
        let json = serde_json::to_value(trigger.greet()).unwrap();
        assert_eq!(json["timeOfDay"], "early-morning");
    }
}
