//! Condition-step predicates. Each is evaluated against the session's
//! transcript and context; the set is closed, and unknown names evaluate
//! to false with a warning.

use log::{debug, info, warn};
use serde_json::Value;

use crate::entities::SessionRecord;

const JOB_NEED_POSITIVE: [&str; 9] = [
    "需要", "想要", "找工作", "就业", "培训", "创业", "失业", "工作", "招聘",
];
const JOB_NEED_NEGATIVE: [&str; 8] = [
    "不需要", "不用", "没有", "不是", "不对", "不要", "没兴趣", "不找",
];
const GREETING_WORDS: [&str; 7] = ["你好", "喂", "听到", "可以", "能听", "在吗", "什么事"];
const SATISFIED_POSITIVE: [&str; 6] = ["满意", "好的", "可以", "谢谢", "行", "好"];
const SATISFIED_NEGATIVE: [&str; 5] = ["不满意", "不好", "不行", "不可以", "不对"];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// True when the caller produced at least one utterance and the last turn
/// loop did not end in silence.
pub fn user_engaged(session: &SessionRecord) -> bool {
    let spoke = session.user_messages().any(|m| !m.content.is_empty());
    spoke && !session.context_flag("no_user_response")
}

/// Evaluate a named predicate. May set follow-up context flags (the
/// greeting-only branch of `has_job_need` marks the session for further
/// inquiry).
pub fn evaluate(condition: &str, session: &mut SessionRecord) -> bool {
    let call_id = session.call_id.clone();
    debug!("[conditions] {call_id} evaluating {condition:?}");

    match condition {
        "has_job_need" => {
            if !user_engaged(session) {
                info!("[conditions] {call_id} user not engaged, assuming no job need");
                return false;
            }
            let mut has_positive = false;
            let mut has_negative = false;
            let mut has_greeting = false;
            for message in session.user_messages() {
                if contains_any(&message.content, &JOB_NEED_POSITIVE) {
                    has_positive = true;
                }
                if contains_any(&message.content, &JOB_NEED_NEGATIVE) {
                    has_negative = true;
                }
                if contains_any(&message.content, &GREETING_WORDS) {
                    has_greeting = true;
                }
            }
            if has_positive && !has_negative {
                return true;
            }
            if has_negative {
                return false;
            }
            if has_greeting {
                // Only pleasantries so far; flag the session so the script
                // can ask again.
                session.set_context("needs_further_inquiry", Value::Bool(true));
                return false;
            }
            false
        }
        "needs_further_inquiry" => session.context_flag("needs_further_inquiry"),
        "user_satisfied" => {
            for message in session.user_messages() {
                // negative first: "不满意" must not match on its "满意" tail
                if contains_any(&message.content, &SATISFIED_NEGATIVE) {
                    return false;
                }
                if contains_any(&message.content, &SATISFIED_POSITIVE) {
                    return true;
                }
            }
            true
        }
        "has_user_response" | "user_engaged" => user_engaged(session),
        "collect_success" => !session.context_flag("collect_failed") && user_engaged(session),
        other => {
            warn!("[conditions] {call_id} unknown condition {other:?}");
            false
        }
    }
}
