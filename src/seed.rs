//! Built-in demo data: the employment-survey script and its phone
//! mappings. Seeding is idempotent by script name so `--init` can be run
//! on every start.

use anyhow::Result;
use log::info;

use crate::script::model::{
    ConditionData, PhoneMapping, PlayAudioData, SayAndListenData, Script, ScriptStatus, Step,
    StepData,
};
use crate::store::SessionStore;

pub const DEMO_SCRIPT_NAME: &str = "就业需求调查";

fn step(order: u32, id: &str, data: StepData) -> Step {
    Step {
        id: id.to_string(),
        group_id: "main".to_string(),
        order,
        data,
    }
}

/// The seeded employment-survey script: greet and probe for a job need,
/// branch on the answer, collect details, promise a follow-up and close.
pub fn demo_script() -> Script {
    let steps = vec![
        step(
            0,
            "welcome",
            StepData::SayAndListen(SayAndListenData {
                prompt: Some(
                    "你是成都市金牛区就业局的工作人员，需要调查市民的就业需求。\
                     请礼貌地询问对方是否有就业需要。"
                        .to_string(),
                ),
                welcome: Some("你好，我是成都市金牛区就业局的工作人员".to_string()),
                speaker_id: Some("1".to_string()),
                next_step: Some("check_need".to_string()),
            }),
        ),
        step(
            1,
            "check_need",
            StepData::Condition(ConditionData {
                condition: "has_job_need".to_string(),
                true_next: Some("collect_need".to_string()),
                false_next: Some("ending".to_string()),
            }),
        ),
        step(
            2,
            "collect_need",
            StepData::SayAndListen(SayAndListenData {
                prompt: Some(
                    "用户有就业需求，请询问具体需要什么服务：找工作、就业培训还是创业服务？"
                        .to_string(),
                ),
                welcome: None,
                speaker_id: Some("1".to_string()),
                next_step: Some("promise_contact".to_string()),
            }),
        ),
        step(
            3,
            "promise_contact",
            StepData::PlayAudio(PlayAudioData {
                audio_text: Some(
                    "请保持电话畅通，我们会尽快安排就业服务专员与您联系".to_string(),
                ),
                welcome: None,
                speaker_id: Some("1".to_string()),
                next_step: Some("ending".to_string()),
            }),
        ),
        step(
            4,
            "ending",
            StepData::SayAndListen(SayAndListenData {
                prompt: Some(
                    "告知用户如需任何服务，可前往居住地就近街道或社区便民服务中心，\
                     然后礼貌地道别结束对话。"
                        .to_string(),
                ),
                welcome: None,
                speaker_id: Some("1".to_string()),
                next_step: Some("hangup".to_string()),
            }),
        ),
        step(5, "hangup", StepData::Hangup),
    ];

    Script {
        id: DEMO_SCRIPT_NAME.to_string(),
        name: DEMO_SCRIPT_NAME.to_string(),
        description: "成都市金牛区就业局就业需求调查脚本".to_string(),
        version: "1.0.0".to_string(),
        status: ScriptStatus::Active,
        speaker_id: "10001".to_string(),
        start_step_id: "welcome".to_string(),
        max_duration_ms: 300_000,
        max_steps: 20,
        steps,
        execute_count: 0,
        success_count: 0,
    }
}

pub fn demo_mappings() -> Vec<PhoneMapping> {
    ["10086", "95588", "400-123-4567"]
        .iter()
        .enumerate()
        .map(|(i, number)| PhoneMapping {
            script_id: DEMO_SCRIPT_NAME.to_string(),
            phone_number: number.to_string(),
            priority: i as i32 + 1,
            enabled: true,
            description: format!("就业调查热线 - {number}"),
            start_time: Some("09:00:00".to_string()),
            end_time: Some("18:00:00".to_string()),
            week_days: Some("1,2,3,4,5".to_string()),
        })
        .collect()
}

/// Write the demo script and mappings through the store unless a script of
/// the same name already exists.
pub async fn seed(store: &dyn SessionStore) -> Result<()> {
    let existing = store.load_scripts().await?;
    if existing.iter().any(|s| s.name == DEMO_SCRIPT_NAME) {
        info!("[seed] demo script already present, skipping");
        return Ok(());
    }

    let script = demo_script();
    script.validate()?;
    store.save_script(&script).await?;
    for mapping in demo_mappings() {
        store.save_phone_mapping(&mapping).await?;
    }
    info!(
        "[seed] seeded {:?} with {} steps and {} phone numbers",
        DEMO_SCRIPT_NAME,
        script.steps.len(),
        demo_mappings().len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn demo_script_is_a_valid_graph() {
        demo_script().validate().unwrap();
    }

    #[test]
    fn demo_branches_reach_the_ending() {
        let script = demo_script();
        let check = script.step("check_need").unwrap();
        if let StepData::Condition(c) = &check.data {
            assert_eq!(c.true_next.as_deref(), Some("collect_need"));
            assert_eq!(c.false_next.as_deref(), Some("ending"));
        } else {
            panic!("check_need must be a condition step");
        }
    }

    #[tokio::test]
    async fn seeding_twice_is_idempotent() {
        let store = MemoryStore::new();
        seed(&store).await.unwrap();
        seed(&store).await.unwrap();
        assert_eq!(store.load_scripts().await.unwrap().len(), 1);
        assert_eq!(store.load_phone_mappings().await.unwrap().len(), 3);
    }
}
