//! Per-request conversation history and the normalization of client messages
//! into backend messages.
use crate::errors::{EngineError, EngineResult};
use crate::models::api::{ChatContent, ChatMessage, ContentPart};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;

/// The growing message list of one request. Messages are only ever appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Client messages split into system text and the conversation proper
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessages {
    /// Text of every `system` message, in request order
    pub system: Vec<String>,
    pub conversation: ConversationState,
}

/// Convert client messages into backend messages.
///
/// System messages are lifted out; they become part of the system
/// instruction. Every other message must carry at least one non-empty part.
pub fn normalize(messages: &[ChatMessage]) -> EngineResult<NormalizedMessages> {
    let mut system = Vec::new();
    let mut conversation = ConversationState::default();

    for (index, chat_message) in messages.iter().enumerate() {
        let content = normalize_content(index, chat_message)?;

        if chat_message.role == Role::System {
            let mut text = String::new();
            for part in content {
                match part {
                    MessageContent::Text(part) => text.push_str(&part.text),
                    _ => {
                        return Err(EngineError::InvalidRequest(format!(
                            "messages[{}]: system messages may only contain text",
                            index
                        )))
                    }
                }
            }
            system.push(text);
            continue;
        }

        let mut message = Message::new(chat_message.role);
        message.content = content;
        conversation.push(message);
    }

    if conversation.is_empty() {
        return Err(EngineError::InvalidRequest(
            "at least one user or assistant message is required".to_string(),
        ));
    }

    Ok(NormalizedMessages {
        system,
        conversation,
    })
}

fn normalize_content(index: usize, message: &ChatMessage) -> EngineResult<Vec<MessageContent>> {
    let parts: Vec<MessageContent> = match &message.content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) if text.is_empty() => Vec::new(),
        Some(ChatContent::Text(text)) => vec![MessageContent::text(text.clone())],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) if text.is_empty() => None,
                ContentPart::Text(text) => Some(MessageContent::text(text.clone())),
                ContentPart::Blob { mime_type, data } => {
                    Some(MessageContent::blob(mime_type.clone(), data.clone()))
                }
            })
            .collect(),
    };

    if parts.is_empty() {
        return Err(EngineError::InvalidRequest(format!(
            "messages[{}] ({}) has no content",
            index,
            message.role.as_str()
        )));
    }
    Ok(parts)
}

/// Join the configured instruction with request-supplied system text
pub fn system_instruction(configured: Option<&str>, request_system: &[String]) -> String {
    configured
        .into_iter()
        .chain(request_system.iter().map(String::as_str))
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_are_lifted_out() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::system("answer in french"),
            ChatMessage::assistant("bonjour"),
        ];
        let normalized = normalize(&messages).unwrap();

        assert_eq!(normalized.system, vec!["be brief", "answer in french"]);
        let roles: Vec<Role> = normalized
            .conversation
            .messages()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(normalized.conversation.messages()[0].text(), "hi");
    }

    #[test]
    fn test_parts_become_text_and_blobs() {
        let messages = vec![ChatMessage::user(ChatContent::Parts(vec![
            ContentPart::Text("look".to_string()),
            ContentPart::Text(String::new()),
            ContentPart::Blob {
                mime_type: "image/png".to_string(),
                data: vec![1, 2, 3],
            },
        ]))];
        let normalized = normalize(&messages).unwrap();

        assert_eq!(
            normalized.conversation.messages()[0].content,
            vec![
                MessageContent::text("look"),
                MessageContent::blob("image/png", vec![1, 2, 3]),
            ]
        );
    }

    #[test]
    fn test_empty_messages_are_rejected() {
        let cases = vec![
            ChatMessage::user(""),
            ChatMessage::user(ChatContent::Parts(vec![])),
            ChatMessage {
                role: Role::User,
                content: None,
                name: None,
            },
        ];
        for message in cases {
            let error = normalize(&[message]).unwrap_err();
            assert!(matches!(error, EngineError::InvalidRequest(_)));
            assert!(error.to_string().contains("messages[0] (user) has no content"));
        }
    }

    #[test]
    fn test_system_only_request_is_rejected() {
        let error = normalize(&[ChatMessage::system("hello")]).unwrap_err();
        assert!(matches!(error, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_system_blob_is_rejected() {
        let message = ChatMessage::system(ChatContent::Parts(vec![ContentPart::Blob {
            mime_type: "image/png".to_string(),
            data: vec![0],
        }]));
        let error = normalize(&[message, ChatMessage::user("hi")]).unwrap_err();
        assert!(error.to_string().contains("only contain text"));
    }

    #[test]
    fn test_system_instruction_joins_non_empty_parts() {
        assert_eq!(system_instruction(None, &[]), "");
        assert_eq!(
            system_instruction(Some("You are tern."), &["be brief".to_string()]),
            "You are tern.\n\nbe brief"
        );
        assert_eq!(
            system_instruction(Some("  "), &["a".to_string(), "b".to_string()]),
            "a\n\nb"
        );
    }

    #[test]
    fn test_state_appends() {
        let mut state = ConversationState::new(vec![Message::user().with_text("hi")]);
        state.push(Message::assistant().with_text("hello"));
        assert_eq!(state.len(), 2);
        assert_eq!(state.messages()[1].text(), "hello");
    }
}
