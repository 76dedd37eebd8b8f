use crate::models::{ConversationMessage, ExtractedIntent, IntentRecord};
use crate::services::ai::{LlmProvider, Message};

const SYSTEM_PROMPT: &str = r#"You read messages sent to a personal calendar assistant and pull out what the user wants. Analyze the latest message in the context of the conversation so far.

Return ONLY valid JSON (no markdown, no explanation) with this exact structure:
{
  "intent": "book|reschedule|cancel|check|null",
  "when": "the date/time words exactly as the user said them, e.g. \"tonight 9pm\", or null",
  "duration": "length as said, e.g. \"30 mins\", or null",
  "purpose": "event title, e.g. \"Meet with Ramesh\", or null",
  "message_to_user": "a short friendly reply"
}

Intent rules:
- "book": the user wants a new event on the calendar
- "reschedule": the user wants to move an existing event; "when" is the NEW time
- "cancel": the user wants an existing event removed
- "check": the user asks what is on their calendar
- null: small talk, thanks, or a plain yes/no to a question you asked

Do not convert times yourself; copy the user's words into "when".
Only fill fields the latest message actually mentions; use null for the rest.
Never claim an event was created, moved or removed. The calendar does that after the user confirms.
Keep message_to_user to one or two sentences.
"#;

/// Ask the model what the latest message is about.
///
/// `insight` is the record as it stood before this message so the model can
/// tell a follow-up ("make it 10pm") from a new request.
pub async fn extract_intent(
    llm: &dyn LlmProvider,
    history: &[ConversationMessage],
    latest_message: &str,
    insight: &IntentRecord,
    reference: &str,
) -> anyhow::Result<ExtractedIntent> {
    let mut messages: Vec<Message> = history
        .iter()
        .map(|m| Message {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect();

    messages.push(Message {
        role: "user".to_string(),
        content: latest_message.to_string(),
    });

    let insight_json = serde_json::to_string(insight)?;
    let system = format!(
        "{SYSTEM_PROMPT}\nReference time: {reference}\nCurrent insight: {insight_json}"
    );

    let response = llm.chat(&system, &messages).await?;

    Ok(parse_intent_response(&response).cleaned())
}

fn parse_intent_response(response: &str) -> ExtractedIntent {
    if let Ok(intent) = serde_json::from_str::<ExtractedIntent>(response) {
        return intent;
    }

    let trimmed = response.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    if let Ok(intent) = serde_json::from_str::<ExtractedIntent>(cleaned) {
        return intent;
    }

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(intent) = serde_json::from_str::<ExtractedIntent>(&cleaned[start..=end]) {
                return intent;
            }
        }
    }

    tracing::warn!("failed to parse LLM response as intent JSON, treating it as chat");
    ExtractedIntent::chat(trimmed)
}
