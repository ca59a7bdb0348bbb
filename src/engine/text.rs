//! Conversational text constants for the Chinese-language deployment:
//! retry prompts, farewell detection, the canned replies used when the LLM
//! is unreachable, and the prompt assembly for conversational steps.

use crate::entities::{ConversationMessage, Role};

/// Prompts played when a say-and-listen turn heard nothing (attempt 1, 2).
pub const SAY_RETRY_PROMPTS: [&str; 2] = [
    "您好，请问您能听到我说话吗？如果能听到请回应一下。",
    "如果您能听到，请说话或者按任意键。",
];

/// Prompts played when a collect step heard nothing (attempt 1, 2).
pub const COLLECT_RETRY_PROMPTS: [&str; 2] = [
    "抱歉，我没有听清楚您的回答，请您再说一遍。",
    "请您大声清楚地说出您的回答。",
];

/// An assistant reply containing any of these ends the turn loop.
pub const FAREWELL_PHRASES: [&str; 5] = ["再见", "祝您", "感谢您的配合", "通话结束", "拜拜"];

/// Deterministic replies used when the LLM fails, rotated by transcript
/// length so consecutive fallbacks differ.
pub const FALLBACK_REPLIES: [&str; 7] = [
    "好的，我明白了。还有什么需要帮助的吗？",
    "谢谢您的回答。让我为您记录一下。",
    "请问您还有其他需要吗？",
    "我已经记录了您的信息，稍后会有专人联系您。",
    "感谢您的配合，祝您生活愉快！",
    "好的，我会为您安排相关服务。",
    "请保持电话畅通，我们会尽快联系您。",
];

/// Spoken before hanging up on a terminal failure.
pub const FAILURE_APOLOGY: &str = "抱歉，系统出现错误，再见。";

pub fn is_farewell(text: &str) -> bool {
    FAREWELL_PHRASES.iter().any(|p| text.contains(p))
}

pub fn fallback_reply(transcript_len: usize) -> &'static str {
    FALLBACK_REPLIES[transcript_len % FALLBACK_REPLIES.len()]
}

/// Compose the full LLM prompt for one conversational turn: the step's
/// system prompt, the rendered transcript, and the fixed reply
/// requirements for phone dialog.
pub fn compose_prompt(base_prompt: &str, conversation: &[ConversationMessage]) -> String {
    let mut history = String::new();
    for message in conversation {
        let role = match message.role {
            Role::User => "用户",
            Role::Assistant => "助手",
        };
        history.push_str(role);
        history.push_str(": ");
        history.push_str(&message.content);
        history.push('\n');
    }

    format!(
        "{base_prompt}\n\n对话历史:\n{history}\n请根据以上对话历史和角色设定，生成合适的回复。回复要求：\n\
         1. 保持角色一致性\n\
         2. 语言自然流畅\n\
         3. 回复简洁明了，适合电话对话\n\
         4. 如果用户表示不需要服务或要结束通话，请礼貌地结束对话\n\n\
         当前用户输入需要回复。"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(role: Role, content: &str) -> ConversationMessage {
        ConversationMessage {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            step_id: "s".into(),
        }
    }

    #[test]
    fn farewell_detection_matches_the_closed_set() {
        assert!(is_farewell("好的，再见！"));
        assert!(is_farewell("祝您生活愉快"));
        assert!(is_farewell("本次通话结束"));
        assert!(!is_farewell("请继续说"));
    }

    #[test]
    fn fallback_rotates_by_transcript_length() {
        assert_eq!(fallback_reply(0), FALLBACK_REPLIES[0]);
        assert_eq!(fallback_reply(8), FALLBACK_REPLIES[1]);
        assert_ne!(fallback_reply(3), fallback_reply(4));
    }

    #[test]
    fn prompt_renders_roles_in_order() {
        let prompt = compose_prompt(
            "你是客服",
            &[msg(Role::User, "你好"), msg(Role::Assistant, "您好")],
        );
        assert!(prompt.starts_with("你是客服"));
        let user_pos = prompt.find("用户: 你好").unwrap();
        let bot_pos = prompt.find("助手: 您好").unwrap();
        assert!(user_pos < bot_pos);
        assert!(prompt.contains("回复要求"));
    }
}
