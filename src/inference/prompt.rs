// Prompt assembly for retrieval-augmented answers

use serde::{Deserialize, Serialize};

use crate::completion::ChatMessage;
use crate::database::RetrievedDocument;

/// Context used when retrieval finds nothing
pub const NO_RETRIEVED_CONTEXT: &str = "No retrieved context.";

/// Separator between retrieved documents in the context block
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Identity the assistant speaks as
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    /// Person or organisation the assistant represents
    pub name: Option<String>,
    /// Where to send questions the context cannot answer, e.g. an email address
    pub contact: Option<String>,
    /// Replaces the generated system instruction verbatim
    pub instructions: Option<String>,
}

impl Persona {
    #[inline]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }

    /// System instruction fixing the persona and grounding rules
    #[inline]
    pub fn system_instruction(&self) -> String {
        if let Some(instructions) = non_blank(self.instructions.as_deref()) {
            return instructions.to_string();
        }

        let Some(name) = non_blank(self.name.as_deref()) else {
            return "You are a helpful assistant. Be factual and concise. \
                    Reference content only from this context when possible."
                .to_string();
        };

        let mut instruction = format!(
            "You are a chatbot representing {name}. Be factual and concise. \
             Use first person (\"I\") to speak as {name}. \
             Reference content only from this context when possible."
        );

        if let Some(contact) = non_blank(self.contact.as_deref()) {
            instruction.push_str(&format!(
                " If you can't answer a question about {name}, prompt them to contact \
                 {name} directly via {contact}."
            ));
        }

        instruction
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Join retrieved documents in ranked order
#[inline]
pub fn assemble_context(documents: &[RetrievedDocument]) -> String {
    if documents.is_empty() {
        return NO_RETRIEVED_CONTEXT.to_string();
    }

    documents
        .iter()
        .map(|doc| doc.document.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Persona instruction, context block and the verbatim question
#[inline]
pub fn build_messages(persona: &Persona, context: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(persona.system_instruction()),
        ChatMessage::system(format!("Context:\n{}", context)),
        ChatMessage::user(question),
    ]
}
