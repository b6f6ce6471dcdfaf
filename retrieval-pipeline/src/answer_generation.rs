use std::sync::Arc;

use async_openai::{
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse,
    },
    Client,
};
use async_trait::async_trait;

use common::error::AppError;

/// Capability interface for the external answer generator: user question plus
/// assembled grounding context in, opaque answer text out. Unavailability is
/// a hard error; retry policy belongs to the caller.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, query: &str, context: &str) -> Result<String, AppError>;
}

/// Chat-completion adapter over an OpenAI-compatible endpoint.
pub struct OpenAiGeneration {
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    model: String,
    system_prompt: String,
}

impl OpenAiGeneration {
    pub fn new(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        system_prompt: String,
    ) -> Self {
        Self {
            client,
            model,
            system_prompt,
        }
    }

    fn create_chat_request(
        &self,
        user_message: String,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(self.system_prompt.clone()).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .build()
            .map_err(|e| AppError::GenerationBackend(e.to_string()))
    }
}

pub fn create_user_message(context: &str, query: &str) -> String {
    format!(
        r"
        Context Information:
        ==================
        {context}

        User Question:
        ==================
        {query}
        "
    )
}

fn process_response(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or_else(|| AppError::GenerationBackend("no content in chat response".into()))
}

#[async_trait]
impl GenerationBackend for OpenAiGeneration {
    async fn generate(&self, query: &str, context: &str) -> Result<String, AppError> {
        let request = self.create_chat_request(create_user_message(context, query))?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::GenerationBackend(e.to_string()))?;
        process_response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_carries_context_and_question() {
        let message = create_user_message("some grounding passage", "what is dharma?");
        assert!(message.contains("some grounding passage"));
        assert!(message.contains("what is dharma?"));
        let context_pos = message.find("Context Information").expect("context header");
        let question_pos = message.find("User Question").expect("question header");
        assert!(context_pos < question_pos);
    }
}
