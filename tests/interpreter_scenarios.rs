//! Interpreter-level scenario tests against the seeded employment-survey
//! script: both condition branches, the silent caller, LLM outage, caller
//! hangup mid-turn, and the broken-successor failure path.

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{session_record, FailingLlm, ScriptedLlm, ScriptedMedia};
use lingsip::engine::interpreter::{run_script, InterpreterDeps, Outcome};
use lingsip::engine::text::FALLBACK_REPLIES;
use lingsip::entities::{Role, StepStatus};
use lingsip::script::model::{SayAndListenData, StepData};
use lingsip::seed::demo_script;
use lingsip::store::MemoryStore;

fn deps(
    media: Arc<ScriptedMedia>,
    llm: Arc<dyn lingsip::ai::LlmPort>,
    store: Arc<MemoryStore>,
) -> InterpreterDeps {
    InterpreterDeps {
        media,
        llm,
        store,
    }
}

/// Step executions must form a walk of the script graph: each recorded
/// successor is the step executed next.
fn assert_walk(store: &MemoryStore, session_id: &str, expected: &[&str]) {
    let steps = store.steps_for(session_id);
    let ids: Vec<&str> = steps.iter().map(|s| s.step_id.as_str()).collect();
    assert_eq!(ids, expected, "execution order mismatch");
    for pair in steps.windows(2) {
        if pair[0].status == StepStatus::Completed {
            assert_eq!(
                pair[0].next_step_id.as_deref(),
                Some(pair[1].step_id.as_str()),
                "step {} must hand over to {}",
                pair[0].step_id,
                pair[1].step_id
            );
        }
    }
}

#[tokio::test]
async fn happy_path_without_job_need_takes_the_false_branch() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    // "你好" is consumed by the welcome step; the ending step hears the
    // rejection and the model says goodbye.
    let media = ScriptedMedia::new(&["你好", "我不需要"], cancel.clone());
    let llm = ScriptedLlm::new(&["请问您目前有就业方面的需要吗？", "好的，打扰了，再见！"]);

    let script = demo_script();
    let mut session = session_record("call-no", &script.id);
    let deps = deps(media.clone(), llm, store.clone());

    let outcome = run_script(&script, &mut session, &deps, &cancel).await;
    assert_eq!(outcome, Outcome::Completed);

    // welcome greeted, condition branched to ending, hangup ended it
    assert_walk(&store, &session.session_id, &["welcome", "check_need", "ending", "hangup"]);
    let condition = &store.steps_for(&session.session_id)[1];
    assert_eq!(condition.output.as_deref(), Some("condition result: false"));
    assert_eq!(condition.next_step_id.as_deref(), Some("ending"));

    assert!(session.conversation.len() >= 4);
    assert_eq!(session.conversation[0].role, Role::User);
    assert_eq!(session.conversation[0].content, "你好");
    let spoken = media.spoken_texts();
    assert!(spoken[0].contains("就业局"), "welcome must be spoken first");
}

#[tokio::test]
async fn happy_path_with_job_need_takes_the_true_branch() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let media = ScriptedMedia::new(&["你好，我想找工作", "就业培训吧", "好的谢谢"], cancel.clone());
    let llm = ScriptedLlm::new(&[
        "好的，请问您需要找工作、就业培训还是创业服务？",
        "已经为您记录，稍后专员会联系您。",
        "感谢您的配合，再见！",
    ]);

    let script = demo_script();
    let mut session = session_record("call-yes", &script.id);
    let deps = deps(media.clone(), llm, store.clone());

    let outcome = run_script(&script, &mut session, &deps, &cancel).await;
    assert_eq!(outcome, Outcome::Completed);

    assert_walk(
        &store,
        &session.session_id,
        &[
            "welcome",
            "check_need",
            "collect_need",
            "promise_contact",
            "ending",
            "hangup",
        ],
    );
    let condition = &store.steps_for(&session.session_id)[1];
    assert_eq!(condition.output.as_deref(), Some("condition result: true"));

    // play-audio step spoke the promise text
    let spoken = media.spoken_texts();
    assert!(spoken.iter().any(|t| t.contains("保持电话畅通")));
}

#[tokio::test]
async fn silent_caller_completes_with_no_response_flag() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    // every listen window stays silent
    let media = ScriptedMedia::new(&[], cancel.clone());
    let llm = ScriptedLlm::new(&[]);

    let script = demo_script();
    let mut session = session_record("call-silent", &script.id);
    let deps = deps(media.clone(), llm, store.clone());

    let outcome = run_script(&script, &mut session, &deps, &cancel).await;
    assert_eq!(outcome, Outcome::Completed, "silence is not a failure");

    assert!(session.context_flag("no_user_response"));
    assert_walk(&store, &session.session_id, &["welcome", "check_need", "ending", "hangup"]);

    // welcome + 2 retry prompts, then 2 more retry prompts at the ending
    let spoken = media.spoken_texts();
    let retries = spoken
        .iter()
        .filter(|t| t.contains("能听到") || t.contains("按任意键"))
        .count();
    assert_eq!(retries, 4);
    assert!(session.conversation.is_empty());
}

#[tokio::test]
async fn llm_outage_falls_back_to_canned_replies() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let media = ScriptedMedia::new(&["你好", "我不需要"], cancel.clone());

    let script = demo_script();
    let mut session = session_record("call-outage", &script.id);
    let deps = deps(media.clone(), Arc::new(FailingLlm), store.clone());

    let outcome = run_script(&script, &mut session, &deps, &cancel).await;
    assert_eq!(outcome, Outcome::Completed);

    // every assistant message comes from the fallback bank
    let assistant: Vec<&str> = session
        .conversation
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.content.as_str())
        .collect();
    assert!(!assistant.is_empty());
    for reply in &assistant {
        assert!(FALLBACK_REPLIES.contains(reply), "unexpected reply {reply:?}");
    }

    // the turns still completed and were recorded
    let steps = store.steps_for(&session.session_id);
    assert!(steps
        .iter()
        .filter(|s| s.step_id == "welcome")
        .all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn caller_hangup_mid_listen_cancels_promptly() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let media = ScriptedMedia::blocking_after(&["你好"], cancel.clone());
    let llm = ScriptedLlm::new(&["请问您有就业需要吗？"]);

    let script = demo_script();
    let mut session = session_record("call-bye", &script.id);
    let deps = deps(media.clone(), llm, store.clone());

    let canceller = cancel.clone();
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let outcome = run_script(&script, &mut session, &deps, &cancel).await;
    trigger.await.unwrap();

    assert_eq!(outcome, Outcome::Cancelled);
    assert!(
        started.elapsed() < std::time::Duration::from_millis(250),
        "cancellation must interrupt the listen promptly"
    );
    // the transcript up to the hangup is preserved
    assert_eq!(session.conversation.len(), 2);
}

#[tokio::test]
async fn unknown_successor_fails_the_session_and_stops_the_walk() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let media = ScriptedMedia::new(&["你好"], cancel.clone());
    let llm = ScriptedLlm::new(&["您好！"]);

    // break the graph after load-time validation would have passed
    let mut script = demo_script();
    for step in &mut script.steps {
        if step.id == "welcome" {
            step.data = StepData::SayAndListen(SayAndListenData {
                prompt: Some("prompt".into()),
                welcome: Some("你好".into()),
                speaker_id: None,
                next_step: Some("missing".into()),
            });
        }
    }

    let mut session = session_record("call-broken", &script.id);
    let deps = deps(media.clone(), llm, store.clone());

    let outcome = run_script(&script, &mut session, &deps, &cancel).await;
    assert_eq!(
        outcome,
        Outcome::Failed("Next step not found: missing".to_string())
    );

    // the first step completed; nothing ran after the dangling reference
    let steps = store.steps_for(&session.session_id);
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_id, "welcome");
    assert_eq!(steps[0].status, StepStatus::Completed);
}

#[tokio::test]
async fn exceeded_max_duration_terminates_as_timeout() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let media = ScriptedMedia::new(&["你好"], cancel.clone());
    let llm = ScriptedLlm::new(&[]);

    let script = demo_script(); // maxDuration 300 000 ms
    let mut session = session_record("call-late", &script.id);
    session.start_time = chrono::Utc::now() - chrono::Duration::minutes(10);

    let deps = deps(media.clone(), llm, store.clone());
    let outcome = run_script(&script, &mut session, &deps, &cancel).await;

    assert_eq!(outcome, Outcome::Timeout("Script execution timeout".into()));
    assert!(media.spoken_texts().is_empty());
}

#[tokio::test]
async fn missing_start_step_fails_before_any_media() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let media = ScriptedMedia::new(&["你好"], cancel.clone());
    let llm = ScriptedLlm::new(&[]);

    let mut script = demo_script();
    script.start_step_id = "vanished".into();

    let mut session = session_record("call-nostart", &script.id);
    let deps = deps(media.clone(), llm, store.clone());
    let outcome = run_script(&script, &mut session, &deps, &cancel).await;

    assert_eq!(
        outcome,
        Outcome::Failed("Next step not found: vanished".into())
    );
    assert!(media.spoken_texts().is_empty(), "no media may be sent");
    assert!(store.steps_for(&session.session_id).is_empty());
}

#[tokio::test]
async fn max_steps_bound_terminates_cyclic_scripts_as_timeout() {
    use lingsip::script::model::{Script, ScriptStatus, Step, WaitData};

    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let media = ScriptedMedia::new(&[], cancel.clone());
    let llm = ScriptedLlm::new(&[]);

    let script = Script {
        id: "loop".into(),
        name: "loop".into(),
        description: String::new(),
        version: "1.0.0".into(),
        status: ScriptStatus::Active,
        speaker_id: "1".into(),
        start_step_id: "spin".into(),
        max_duration_ms: 300_000,
        max_steps: 5,
        steps: vec![Step {
            id: "spin".into(),
            group_id: "main".into(),
            order: 0,
            data: StepData::Wait(WaitData {
                wait_time: Some(1),
                next_step: Some("spin".into()),
            }),
        }],
        execute_count: 0,
        success_count: 0,
    };
    script.validate().unwrap();

    let mut session = session_record("call-loop", &script.id);
    let deps = deps(media, llm, store.clone());
    let outcome = run_script(&script, &mut session, &deps, &cancel).await;

    assert_eq!(outcome, Outcome::Timeout("Max step count reached".into()));
    assert_eq!(store.steps_for(&session.session_id).len(), 5);
}
