use crate::protocol::{ContentPart, Event};
use serde_json::Value;

pub const DEFAULT_PRODUCER_ROLES: [&str; 4] = ["coder_agent", "fixer_agent", "coder", "fixer"];
pub const DEFAULT_DELEGATION_TOOL: &str = "transfer_to_agent";
pub const DEFAULT_DELEGATION_ARG: &str = "agent_name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Summary,
    Activity,
    Error,
    Code,
}

/// A user-visible line produced from one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
    pub agent: String,
}

impl Message {
    fn new(kind: MessageKind, agent: &str, text: String) -> Self {
        Self {
            kind,
            text,
            agent: agent.to_string(),
        }
    }
}

/// Per-session state the interpreter writes to.
///
/// Holds the single current-code register: the latest artifact produced by a
/// producer role. Each new artifact overwrites the previous one.
#[derive(Debug, Default)]
pub struct SessionContext {
    current_code: Option<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_code(&self) -> Option<&str> {
        self.current_code.as_deref()
    }

    pub fn set_code(&mut self, code: impl Into<String>) {
        self.current_code = Some(code.into());
    }
}

pub struct EventInterpreter {
    producer_roles: Vec<String>,
    delegation_tool: String,
    delegation_arg: String,
}

impl Default for EventInterpreter {
    fn default() -> Self {
        Self::new(
            DEFAULT_PRODUCER_ROLES.iter().map(|role| role.to_string()).collect(),
            DEFAULT_DELEGATION_TOOL.to_string(),
            DEFAULT_DELEGATION_ARG.to_string(),
        )
    }
}

impl EventInterpreter {
    pub fn new(producer_roles: Vec<String>, delegation_tool: String, delegation_arg: String) -> Self {
        Self {
            producer_roles,
            delegation_tool,
            delegation_arg,
        }
    }

    fn is_producer(&self, author: &str) -> bool {
        self.producer_roles.iter().any(|role| role == author)
    }

    /// Classifies one event into messages, in part order.
    ///
    /// An event carrying an error code yields exactly one `Error` message and
    /// its parts are not looked at.
    pub fn interpret(&self, event: &Event, session: &mut SessionContext) -> Vec<Message> {
        let author = event.author.as_str();

        if let Some(code) = &event.error_code {
            tracing::warn!(
                author,
                code = %code,
                message = event.error_message.as_deref().unwrap_or_default(),
                "agent reported an error"
            );
            return vec![Message::new(
                MessageKind::Error,
                author,
                format!("{author}: {code}"),
            )];
        }

        let mut messages = Vec::with_capacity(event.parts.len());
        for part in &event.parts {
            match part {
                ContentPart::Text { value } => {
                    if value.is_empty() {
                        continue;
                    }
                    messages.push(Message::new(
                        MessageKind::Summary,
                        author,
                        format!("[{author}]: {value}"),
                    ));
                }
                ContentPart::FunctionResponse { result: None } => {
                    messages.push(Message::new(
                        MessageKind::Error,
                        author,
                        format!("[{author}]: tool execution failed"),
                    ));
                }
                ContentPart::FunctionResponse {
                    result: Some(result),
                } => {
                    if !self.is_producer(author) {
                        continue;
                    }
                    session.set_code(result.as_str());
                    tracing::debug!(author, bytes = result.len(), "code artifact updated");
                    messages.push(Message::new(
                        MessageKind::Code,
                        author,
                        format!("[{author}]: code generated"),
                    ));
                }
                ContentPart::FunctionCall { name, args } => {
                    let target = if *name == self.delegation_tool {
                        args.get(&self.delegation_arg).and_then(Value::as_str)
                    } else {
                        None
                    };
                    let text = match target {
                        Some(target) => format!("[{author}]: delegating to {target}"),
                        None => format!("[{author}]: calling {name}"),
                    };
                    messages.push(Message::new(MessageKind::Activity, author, text));
                }
            }
        }
        messages
    }
}
