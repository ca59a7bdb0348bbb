//! The runtime script graph: named, versioned, with typed steps addressed
//! by script-unique identifiers. Successors are looked up by identifier at
//! every transition, so cyclic graphs need no special representation.

use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, NaiveDateTime, NaiveTime};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    Draft,
    Active,
    Inactive,
    Archived,
}

impl ScriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptStatus::Draft => "draft",
            ScriptStatus::Active => "active",
            ScriptStatus::Inactive => "inactive",
            ScriptStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepType {
    #[serde(rename = "say-and-listen")]
    SayAndListen,
    #[serde(rename = "play-audio")]
    PlayAudio,
    #[serde(rename = "collect")]
    Collect,
    #[serde(rename = "condition")]
    Condition,
    #[serde(rename = "wait")]
    Wait,
    #[serde(rename = "dtmf")]
    Dtmf,
    #[serde(rename = "record")]
    Record,
    #[serde(rename = "transfer")]
    Transfer,
    #[serde(rename = "hangup")]
    Hangup,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::SayAndListen => "say-and-listen",
            StepType::PlayAudio => "play-audio",
            StepType::Collect => "collect",
            StepType::Condition => "condition",
            StepType::Wait => "wait",
            StepType::Dtmf => "dtmf",
            StepType::Record => "record",
            StepType::Transfer => "transfer",
            StepType::Hangup => "hangup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SayAndListenData {
    /// LLM system prompt for this conversational step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayAudioData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_text: Option<String>,
    /// Fallback text when `audioText` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collect_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionData {
    pub condition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitData {
    /// Milliseconds; 1000 when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtmfData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtmf_prompt: Option<String>,
    /// Milliseconds; 10000 when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtmf_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtmf_max_digits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtmf_terminator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtmf_options: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

/// Per-type payload, a closed discriminated union over the step type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepData {
    SayAndListen(SayAndListenData),
    PlayAudio(PlayAudioData),
    Collect(CollectData),
    Condition(ConditionData),
    Wait(WaitData),
    Dtmf(DtmfData),
    Record(RecordData),
    Transfer(TransferData),
    Hangup,
}

impl StepData {
    pub fn step_type(&self) -> StepType {
        match self {
            StepData::SayAndListen(_) => StepType::SayAndListen,
            StepData::PlayAudio(_) => StepType::PlayAudio,
            StepData::Collect(_) => StepType::Collect,
            StepData::Condition(_) => StepType::Condition,
            StepData::Wait(_) => StepType::Wait,
            StepData::Dtmf(_) => StepType::Dtmf,
            StepData::Record(_) => StepType::Record,
            StepData::Transfer(_) => StepType::Transfer,
            StepData::Hangup => StepType::Hangup,
        }
    }

    /// Every step identifier this payload can transition to.
    pub fn referenced_steps(&self) -> Vec<&str> {
        fn push<'a>(out: &mut Vec<&'a str>, v: &'a Option<String>) {
            if let Some(s) = v.as_deref() {
                if !s.is_empty() {
                    out.push(s);
                }
            }
        }
        let mut out = Vec::new();
        match self {
            StepData::SayAndListen(d) => push(&mut out, &d.next_step),
            StepData::PlayAudio(d) => push(&mut out, &d.next_step),
            StepData::Collect(d) => {
                push(&mut out, &d.next_step);
                push(&mut out, &d.false_next);
            }
            StepData::Condition(d) => {
                push(&mut out, &d.true_next);
                push(&mut out, &d.false_next);
            }
            StepData::Wait(d) => push(&mut out, &d.next_step),
            StepData::Dtmf(d) => {
                push(&mut out, &d.next_step);
                push(&mut out, &d.false_next);
                if let Some(options) = &d.dtmf_options {
                    out.extend(options.values().map(String::as_str).filter(|s| !s.is_empty()));
                }
            }
            StepData::Record(d) => push(&mut out, &d.next_step),
            StepData::Transfer(d) => push(&mut out, &d.next_step),
            StepData::Hangup => {}
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Authoring group; retained for grouping only, no runtime semantics.
    pub group_id: String,
    pub order: u32,
    pub data: StepData,
}

impl Step {
    pub fn step_type(&self) -> StepType {
        self.data.step_type()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script has no steps")]
    Empty,
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),
    #[error("start step not found: {0}")]
    StartStepMissing(String),
    #[error("step {step} references unknown step: {target}")]
    UnknownSuccessor { step: String, target: String },
    #[error("condition step {0} requires both trueNext and falseNext")]
    MissingBranch(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub status: ScriptStatus,
    pub speaker_id: String,
    pub start_step_id: String,
    /// Maximum total call duration in milliseconds.
    pub max_duration_ms: u64,
    pub max_steps: u32,
    pub steps: Vec<Step>,
    pub execute_count: u64,
    pub success_count: u64,
}

impl Script {
    pub fn is_active(&self) -> bool {
        self.status == ScriptStatus::Active
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn start_step(&self) -> Option<&Step> {
        self.step(&self.start_step_id)
    }

    /// Load-time validation: unique identifiers, resolvable start step,
    /// every named successor present, condition steps fully branched.
    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.steps.is_empty() {
            return Err(ScriptError::Empty);
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(ScriptError::DuplicateStepId(step.id.clone()));
            }
        }
        if !seen.contains(self.start_step_id.as_str()) {
            return Err(ScriptError::StartStepMissing(self.start_step_id.clone()));
        }
        for step in &self.steps {
            if let StepData::Condition(d) = &step.data {
                if d.true_next.as_deref().unwrap_or("").is_empty()
                    || d.false_next.as_deref().unwrap_or("").is_empty()
                {
                    return Err(ScriptError::MissingBranch(step.id.clone()));
                }
            }
            for target in step.data.referenced_steps() {
                if !seen.contains(target) {
                    return Err(ScriptError::UnknownSuccessor {
                        step: step.id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Binding of a phone number to a script, with priority and optional
/// time-of-day / weekday gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneMapping {
    pub script_id: String,
    pub phone_number: String,
    pub priority: i32,
    pub enabled: bool,
    pub description: String,
    /// "HH:MM:SS", inclusive window start.
    pub start_time: Option<String>,
    /// "HH:MM:SS", inclusive window end.
    pub end_time: Option<String>,
    /// Comma-separated weekday numbers, Monday = 1.
    pub week_days: Option<String>,
}

impl PhoneMapping {
    pub fn matches_at(&self, local: NaiveDateTime) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(days) = self.week_days.as_deref() {
            let weekday = local.weekday().number_from_monday();
            let allowed = days
                .split(',')
                .filter_map(|d| d.trim().parse::<u32>().ok())
                .any(|d| d == weekday);
            if !allowed {
                return false;
            }
        }
        let time = local.time();
        if let Some(start) = self.start_time.as_deref().and_then(parse_window_time) {
            if time < start {
                return false;
            }
        }
        if let Some(end) = self.end_time.as_deref().and_then(parse_window_time) {
            if time > end {
                return false;
            }
        }
        true
    }
}

fn parse_window_time(s: &str) -> Option<NaiveTime> {
    match NaiveTime::parse_from_str(s, "%H:%M:%S") {
        Ok(t) => Some(t),
        Err(_) => {
            warn!("[script] ignoring malformed window time {s:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, data: StepData) -> Step {
        Step {
            id: id.to_string(),
            group_id: "main".to_string(),
            order: 0,
            data,
        }
    }

    fn two_step_script() -> Script {
        Script {
            id: "s1".into(),
            name: "demo".into(),
            description: String::new(),
            version: "1.0.0".into(),
            status: ScriptStatus::Active,
            speaker_id: "1".into(),
            start_step_id: "a".into(),
            max_duration_ms: 300_000,
            max_steps: 20,
            steps: vec![
                step(
                    "a",
                    StepData::PlayAudio(PlayAudioData {
                        audio_text: Some("hi".into()),
                        next_step: Some("b".into()),
                        ..Default::default()
                    }),
                ),
                step("b", StepData::Hangup),
            ],
            execute_count: 0,
            success_count: 0,
        }
    }

    #[test]
    fn valid_script_passes() {
        two_step_script().validate().unwrap();
    }

    #[test]
    fn missing_start_step_is_rejected() {
        let mut s = two_step_script();
        s.start_step_id = "zzz".into();
        assert_eq!(
            s.validate(),
            Err(ScriptError::StartStepMissing("zzz".into()))
        );
    }

    #[test]
    fn dangling_successor_is_rejected() {
        let mut s = two_step_script();
        s.steps[0].data = StepData::PlayAudio(PlayAudioData {
            audio_text: Some("hi".into()),
            next_step: Some("missing".into()),
            ..Default::default()
        });
        assert_eq!(
            s.validate(),
            Err(ScriptError::UnknownSuccessor {
                step: "a".into(),
                target: "missing".into()
            })
        );
    }

    #[test]
    fn condition_requires_both_branches() {
        let mut s = two_step_script();
        s.steps[0].data = StepData::Condition(ConditionData {
            condition: "has_user_response".into(),
            true_next: Some("b".into()),
            false_next: None,
        });
        assert_eq!(s.validate(), Err(ScriptError::MissingBranch("a".into())));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut s = two_step_script();
        s.steps.push(step("a", StepData::Hangup));
        assert_eq!(s.validate(), Err(ScriptError::DuplicateStepId("a".into())));
    }

    #[test]
    fn dtmf_options_count_as_successors() {
        let mut s = two_step_script();
        let mut options = BTreeMap::new();
        options.insert("1".to_string(), "nowhere".to_string());
        s.steps[0].data = StepData::Dtmf(DtmfData {
            dtmf_options: Some(options),
            next_step: Some("b".into()),
            ..Default::default()
        });
        assert!(matches!(
            s.validate(),
            Err(ScriptError::UnknownSuccessor { .. })
        ));
    }

    #[test]
    fn cycles_are_allowed() {
        let mut s = two_step_script();
        s.steps[0].data = StepData::Collect(CollectData {
            welcome: Some("say".into()),
            next_step: Some("b".into()),
            false_next: Some("a".into()), // retry loops back to itself
            ..Default::default()
        });
        s.validate().unwrap();
    }

    #[test]
    fn mapping_window_and_weekday_gating() {
        let mapping = PhoneMapping {
            script_id: "s1".into(),
            phone_number: "10086".into(),
            priority: 1,
            enabled: true,
            description: String::new(),
            start_time: Some("09:00:00".into()),
            end_time: Some("18:00:00".into()),
            week_days: Some("1,2,3,4,5".into()),
        };
        // 2026-07-01 is a Wednesday
        let inside = NaiveDateTime::parse_from_str("2026-07-01 10:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let late = NaiveDateTime::parse_from_str("2026-07-01 19:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let sunday = NaiveDateTime::parse_from_str("2026-07-05 10:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert!(mapping.matches_at(inside));
        assert!(!mapping.matches_at(late));
        assert!(!mapping.matches_at(sunday));

        let disabled = PhoneMapping {
            enabled: false,
            ..mapping
        };
        assert!(!disabled.matches_at(inside));
    }
}
