#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! The rule engine (spec §4.I): threshold, anomaly, and forecast rules,
//! each with an independent cooldown, producing `Notification`s for the
//! external notifier.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use sysmon_types::{Event, EventType, Notification, Sample, Severity};

/// Comparison operator for a threshold rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Strictly greater than.
    Gt,
    /// Greater than or equal to.
    Ge,
}

impl Op {
    fn crosses(self, value: f64, threshold: f64) -> bool {
        match self {
            Op::Gt => value > threshold,
            Op::Ge => value >= threshold,
        }
    }
}

/// What triggers a rule (spec §4.I).
#[derive(Debug, Clone)]
pub enum Kind {
    /// Fires when `metric op value` holds for the current Sample.
    Threshold { metric: String, op: Op, value: f64 },
    /// Fires when an `anomaly` Event is written with `score >= min_score`.
    Anomaly { min_score: f64 },
    /// Fires when a `forecast_breach` Event has `eta <= min_eta`.
    Forecast { min_eta_seconds: f64 },
}

/// A configured rule: what triggers it, its cooldown, and the
/// notification it produces when it fires.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique rule identifier.
    pub id: String,
    /// What triggers this rule.
    pub kind: Kind,
    /// Minimum time between firings.
    pub cooldown: Duration,
    /// Severity attached to notifications this rule produces.
    pub severity: Severity,
    /// Short title for the notification.
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Armed,
    Cooling,
}

struct RuleState {
    state: State,
    cooling_since: Option<Instant>,
}

/// The rule engine: evaluates incoming Samples and Events against a
/// configured rule set, tracking per-rule cooldown state. Owned
/// exclusively by one thread (the maintenance thread, per spec §5); not
/// `Sync`.
pub struct RuleEngine {
    rules: Vec<Rule>,
    state: HashMap<String, RuleState>,
}

impl RuleEngine {
    /// Builds an engine over `rules`, all rules starting `Armed`.
    pub fn new(rules: Vec<Rule>) -> Self {
        let state = rules
            .iter()
            .map(|r| (r.id.clone(), RuleState { state: State::Armed, cooling_since: None }))
            .collect();
        Self { rules, state }
    }

    fn try_fire(&mut self, rule_id: &str, now: Instant, cooldown: Duration) -> bool {
        let entry = self.state.get_mut(rule_id).expect("rule state initialised in new()");
        match entry.state {
            State::Cooling => {
                let since = entry.cooling_since.expect("cooling state always carries a timestamp");
                if now.duration_since(since) >= cooldown {
                    entry.state = State::Armed;
                    entry.cooling_since = None;
                } else {
                    return false;
                }
            }
            State::Armed => {}
        }
        entry.state = State::Cooling;
        entry.cooling_since = Some(now);
        true
    }

    /// Evaluates threshold rules against `sample`, returning any
    /// notifications produced.
    pub fn evaluate_sample(&mut self, sample: &Sample, now: Instant) -> Vec<Notification> {
        let rules = self.rules.clone();
        let mut out = Vec::new();
        for rule in &rules {
            let Kind::Threshold { metric, op, value } = &rule.kind else { continue };
            let Some(current) = metric_value(sample, metric) else { continue };
            if !op.crosses(current, *value) {
                continue;
            }
            if self.try_fire(&rule.id, now, rule.cooldown) {
                out.push(Notification {
                    severity: rule.severity,
                    title: rule.title.clone(),
                    body: format!("{metric} = {current:.2} crossed threshold {value:.2}"),
                    source_event_id: None,
                });
            }
        }
        out
    }

    /// Evaluates anomaly/forecast rules against a newly written `event`,
    /// returning any notifications produced.
    pub fn evaluate_event(&mut self, event: &Event, now: Instant) -> Vec<Notification> {
        let rules = self.rules.clone();
        let mut out = Vec::new();
        for rule in &rules {
            let fires = match (&rule.kind, event.r#type) {
                (Kind::Anomaly { min_score }, EventType::Anomaly) => event.score.is_some_and(|s| s >= *min_score),
                (Kind::Forecast { min_eta_seconds }, EventType::ForecastBreach) => {
                    event.score.is_some_and(|eta| eta <= *min_eta_seconds)
                }
                _ => false,
            };
            if !fires {
                continue;
            }
            if self.try_fire(&rule.id, now, rule.cooldown) {
                out.push(Notification {
                    severity: rule.severity,
                    title: rule.title.clone(),
                    body: event.explanation.clone(),
                    source_event_id: event.id,
                });
            }
        }
        out
    }
}

fn metric_value(sample: &Sample, metric: &str) -> Option<f64> {
    Sample::METRIC_COLUMNS
        .iter()
        .position(|&c| c == metric)
        .map(|idx| sample.metric_values()[idx])
}

#[cfg(test)]
mod test {
    use super::*;

    fn cpu_sample(ts: i64, cpu: f64) -> Sample {
        Sample {
            ts,
            host: "h1".into(),
            cpu_pct: cpu,
            mem_pct: 0.0,
            disk_read_bps: 0.0,
            disk_write_bps: 0.0,
            net_up_bps: 0.0,
            net_down_bps: 0.0,
            swap_pct: 0.0,
            proc_count: 0,
            cpu_temp: None,
        }
    }

    fn threshold_rule() -> Rule {
        Rule {
            id: "cpu-high".into(),
            kind: Kind::Threshold { metric: "cpu_pct".into(), op: Op::Ge, value: 90.0 },
            cooldown: Duration::from_secs(300),
            severity: Severity::Warning,
            title: "CPU high".into(),
        }
    }

    #[test]
    fn a_threshold_rule_fires_once_then_mutes_until_cooldown_expires() {
        let mut engine = RuleEngine::new(vec![threshold_rule()]);
        let t0 = Instant::now();

        let first = engine.evaluate_sample(&cpu_sample(0, 95.0), t0);
        assert_eq!(first.len(), 1);

        let second = engine.evaluate_sample(&cpu_sample(1, 96.0), t0 + Duration::from_secs(10));
        assert!(second.is_empty(), "rule should still be cooling");

        let third = engine.evaluate_sample(&cpu_sample(2, 97.0), t0 + Duration::from_secs(301));
        assert_eq!(third.len(), 1, "rule should be armed again after cooldown");
    }

    #[test]
    fn a_threshold_rule_does_not_fire_below_its_value() {
        let mut engine = RuleEngine::new(vec![threshold_rule()]);
        let notifications = engine.evaluate_sample(&cpu_sample(0, 50.0), Instant::now());
        assert!(notifications.is_empty());
    }

    #[test]
    fn an_anomaly_rule_fires_only_when_score_meets_the_minimum() {
        let rule = Rule {
            id: "anomaly-rule".into(),
            kind: Kind::Anomaly { min_score: 0.7 },
            cooldown: Duration::from_secs(60),
            severity: Severity::Critical,
            title: "Anomaly detected".into(),
        };
        let mut engine = RuleEngine::new(vec![rule]);
        let low = Event {
            id: Some(1),
            ts: 0,
            r#type: EventType::Anomaly,
            score: Some(0.5),
            metric_tags: vec![],
            explanation: String::new(),
        };
        assert!(engine.evaluate_event(&low, Instant::now()).is_empty());

        let high = Event { score: Some(0.9), ..low };
        assert_eq!(engine.evaluate_event(&high, Instant::now()).len(), 1);
    }

    #[test]
    fn a_forecast_rule_fires_only_when_eta_is_within_the_minimum() {
        let rule = Rule {
            id: "forecast-rule".into(),
            kind: Kind::Forecast { min_eta_seconds: 3600.0 },
            cooldown: Duration::from_secs(60),
            severity: Severity::Warning,
            title: "Breach imminent".into(),
        };
        let mut engine = RuleEngine::new(vec![rule]);
        let far = Event {
            id: Some(1),
            ts: 0,
            r#type: EventType::ForecastBreach,
            score: Some(7200.0),
            metric_tags: vec![],
            explanation: String::new(),
        };
        assert!(engine.evaluate_event(&far, Instant::now()).is_empty());

        let near = Event { score: Some(1800.0), ..far };
        assert_eq!(engine.evaluate_event(&near, Instant::now()).len(), 1);
    }

    proptest::proptest! {
        /// However often a threshold rule's condition holds, consecutive
        /// firings are always at least one cooldown apart.
        #[test]
        fn a_rule_never_fires_twice_within_its_own_cooldown(
            deltas_secs in proptest::collection::vec(0u64..20, 1..100),
            cooldown_secs in 1u64..30,
        ) {
            let rule = Rule {
                cooldown: Duration::from_secs(cooldown_secs),
                ..threshold_rule()
            };
            let mut engine = RuleEngine::new(vec![rule]);
            let t0 = Instant::now();

            let mut elapsed = 0u64;
            let mut fire_times = Vec::new();
            for (i, delta) in deltas_secs.iter().enumerate() {
                elapsed += delta;
                let now = t0 + Duration::from_secs(elapsed);
                let fired = engine.evaluate_sample(&cpu_sample(i as i64, 95.0), now);
                if !fired.is_empty() {
                    fire_times.push(elapsed);
                }
            }

            for pair in fire_times.windows(2) {
                proptest::prop_assert!(pair[1] - pair[0] >= cooldown_secs);
            }
        }
    }
}
