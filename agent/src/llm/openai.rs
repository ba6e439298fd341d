use crate::llm;
use crate::{Error, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestAssistantMessageContent,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema, Role,
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Client for any OpenAI-compatible chat endpoint, including Ollama's `/v1` API.
pub struct OpenAI {
    model: String,
    client: Client<OpenAIConfig>,
}

impl OpenAI {
    /// Talk to a local Ollama server at `host` (e.g. `http://localhost:11434`).
    pub fn ollama(model: String, host: &str, timeout: Duration) -> Result<Arc<Self>> {
        let config = OpenAIConfig::new()
            .with_api_base(format!("{}/v1", host.trim_end_matches('/')))
            // ollama ignores the key but the client insists on sending one
            .with_api_key("ollama");

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Arc::new(Self {
            model,
            client: Client::with_config(config).with_http_client(http),
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TryFrom<&llm::Message> for ChatCompletionRequestMessage {
    type Error = Error;

    fn try_from(msg: &llm::Message) -> Result<Self> {
        match msg {
            llm::Message::User(msg) => Ok(ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(msg.clone()),
                    name: None,
                },
            )),
            llm::Message::System(msg) => Ok(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.clone()),
                    name: None,
                },
            )),
            llm::Message::Assistant(msg) => Ok(ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(ChatCompletionRequestAssistantMessageContent::Text(
                        msg.clone(),
                    ))
                    .build()?,
            )),
        }
    }
}

impl From<&llm::ResponseSchema> for ResponseFormat {
    fn from(schema: &llm::ResponseSchema) -> Self {
        ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: schema.name.clone(),
                schema: Some(schema.schema.clone()),
                strict: Some(true),
            },
        }
    }
}

#[async_trait]
impl llm::LLM for OpenAI {
    async fn completion<'a>(
        &self,
        request: llm::CompletionRequest<'a>,
    ) -> Result<llm::CompletionResponse> {
        let mut completion = CreateChatCompletionRequestArgs::default();
        completion.model(&self.model).messages(
            request
                .messages
                .iter()
                .map(ChatCompletionRequestMessage::try_from)
                .collect::<Result<Vec<_>>>()?,
        );

        if let Some(temperature) = request.temperature {
            completion.temperature(temperature);
        }

        if let Some(schema) = request.response_schema {
            completion.response_format(ResponseFormat::from(schema));
        }

        let completion = completion.build()?;

        tracing::debug!(model = %self.model, "sending chat completion");
        let res = self.client.chat().create(completion).await?;

        let choice = res
            .choices
            .first()
            .ok_or(Error::LLMResponseError("choices is empty".to_string()))?;

        if choice.message.role != Role::Assistant {
            return Err(Error::LLMResponseError(
                "expected role to be assistant".to_string(),
            ));
        }

        let content = choice
            .message
            .content
            .as_ref()
            .ok_or(Error::LLMResponseError("content is empty".to_string()))?;

        Ok(llm::CompletionResponse {
            content: content.clone(),
        })
    }

    async fn models(&self) -> Result<Vec<String>> {
        let res = self.client.models().list().await?;
        Ok(res.data.into_iter().map(|model| model.id).collect())
    }
}
