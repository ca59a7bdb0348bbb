//! The JSON authoring format for scripts:
//!
//! ```json
//! { "name": "...", "speakerId": "...", "startId": "...",
//!   "groups": [ { "id": "g", "name": "...",
//!                 "steps": [ { "id": "s", "type": "wait", "data": {...} } ] } ] }
//! ```
//!
//! Groups are flattened into ordered steps at load time; the group id is
//! retained for authoring round-trips only. Unknown keys inside a step's
//! `data` object are reported as warnings, not errors.

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::script::model::{
    CollectData, ConditionData, DtmfData, PlayAudioData, RecordData, SayAndListenData, Script,
    ScriptStatus, Step, StepData, StepType, TransferData, WaitData,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub name: String,
    #[serde(rename = "speakerId")]
    pub speaker_id: String,
    #[serde(rename = "startId")]
    pub start_id: String,
    pub groups: Vec<GroupDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDocument {
    pub id: String,
    pub name: String,
    pub steps: Vec<StepDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub data: Value,
}

/// Keys each step type understands, for the unknown-field warnings.
fn known_keys(step_type: StepType) -> &'static [&'static str] {
    match step_type {
        StepType::SayAndListen => &["prompt", "welcome", "speakerId", "nextStep"],
        StepType::PlayAudio => &["audioText", "welcome", "speakerId", "nextStep"],
        StepType::Collect => &["welcome", "collectKey", "speakerId", "nextStep", "falseNext"],
        StepType::Condition => &["condition", "trueNext", "falseNext"],
        StepType::Wait => &["waitTime", "nextStep"],
        StepType::Dtmf => &[
            "dtmfPrompt",
            "dtmfTimeout",
            "dtmfMaxDigits",
            "dtmfTerminator",
            "dtmfOptions",
            "nextStep",
            "falseNext",
            "speakerId",
        ],
        StepType::Record => &["recordTime", "recordPrompt", "nextStep"],
        StepType::Transfer => &["transferTo", "transferType", "nextStep"],
        StepType::Hangup => &[],
    }
}

fn parse_step_data(step_id: &str, step_type: StepType, data: &Value) -> Result<StepData> {
    if let Value::Object(map) = data {
        let allowed = known_keys(step_type);
        for key in map.keys() {
            if !allowed.contains(&key.as_str()) {
                warn!("[script] step {step_id}: unknown data field {key:?} ignored");
            }
        }
    }
    let data = data.clone();
    let parsed = match step_type {
        StepType::SayAndListen => {
            StepData::SayAndListen(serde_json::from_value::<SayAndListenData>(data)?)
        }
        StepType::PlayAudio => StepData::PlayAudio(serde_json::from_value::<PlayAudioData>(data)?),
        StepType::Collect => StepData::Collect(serde_json::from_value::<CollectData>(data)?),
        StepType::Condition => StepData::Condition(serde_json::from_value::<ConditionData>(data)?),
        StepType::Wait => StepData::Wait(serde_json::from_value::<WaitData>(data)?),
        StepType::Dtmf => StepData::Dtmf(serde_json::from_value::<DtmfData>(data)?),
        StepType::Record => StepData::Record(serde_json::from_value::<RecordData>(data)?),
        StepType::Transfer => StepData::Transfer(serde_json::from_value::<TransferData>(data)?),
        StepType::Hangup => StepData::Hangup,
    };
    Ok(parsed)
}

fn step_data_to_value(data: &StepData) -> Result<Value> {
    let value = match data {
        StepData::SayAndListen(d) => serde_json::to_value(d)?,
        StepData::PlayAudio(d) => serde_json::to_value(d)?,
        StepData::Collect(d) => serde_json::to_value(d)?,
        StepData::Condition(d) => serde_json::to_value(d)?,
        StepData::Wait(d) => serde_json::to_value(d)?,
        StepData::Dtmf(d) => serde_json::to_value(d)?,
        StepData::Record(d) => serde_json::to_value(d)?,
        StepData::Transfer(d) => serde_json::to_value(d)?,
        StepData::Hangup => Value::Object(serde_json::Map::new()),
    };
    Ok(value)
}

impl ScriptDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Flatten into a validated runtime script. The document name doubles
    /// as the script identifier for documents loaded from disk.
    pub fn into_script(self) -> Result<Script> {
        let mut steps = Vec::new();
        let mut order = 0u32;
        for group in &self.groups {
            for doc in &group.steps {
                let data = parse_step_data(&doc.id, doc.step_type, &doc.data)?;
                steps.push(Step {
                    id: doc.id.clone(),
                    group_id: group.id.clone(),
                    order,
                    data,
                });
                order += 1;
            }
        }

        let script = Script {
            id: self.name.clone(),
            name: self.name,
            description: String::new(),
            version: "1.0.0".to_string(),
            status: ScriptStatus::Active,
            speaker_id: self.speaker_id,
            start_step_id: self.start_id,
            max_duration_ms: 300_000,
            max_steps: 50,
            steps,
            execute_count: 0,
            success_count: 0,
        };
        script
            .validate()
            .map_err(|e| anyhow!("script {:?}: {e}", script.name))?;
        Ok(script)
    }

    /// Re-emit the authoring document for a runtime script, regrouping
    /// steps by their retained group id (order preserved).
    pub fn from_script(script: &Script) -> Result<Self> {
        let mut groups: Vec<GroupDocument> = Vec::new();
        for step in &script.steps {
            let doc = StepDocument {
                id: step.id.clone(),
                step_type: step.step_type(),
                data: step_data_to_value(&step.data)?,
            };
            match groups.last_mut() {
                Some(g) if g.id == step.group_id => g.steps.push(doc),
                _ => groups.push(GroupDocument {
                    id: step.group_id.clone(),
                    name: step.group_id.clone(),
                    steps: vec![doc],
                }),
            }
        }
        Ok(Self {
            name: script.name.clone(),
            speaker_id: script.speaker_id.clone(),
            start_id: script.start_step_id.clone(),
            groups,
        })
    }
}

/// Load a script from a JSON document on disk.
pub fn load_script_file(path: &std::path::Path) -> Result<Script> {
    let json = std::fs::read_to_string(path)?;
    ScriptDocument::from_json(&json)?.into_script()
}
