use crate::Result;
use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};

mod openai;
pub use openai::OpenAI;

#[derive(Clone, Debug)]
pub enum Message {
    User(String),
    Assistant(String),
    System(String),
}

/// A JSON schema the model is asked to shape its answer after.
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl ResponseSchema {
    pub fn new<P: JsonSchema>(name: &str) -> Result<Self> {
        let schema = schema_for!(P);
        let schema = serde_json::to_value(&schema)?;
        Ok(Self {
            name: name.to_string(),
            schema,
        })
    }
}

pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub temperature: Option<f32>,
    pub response_schema: Option<&'a ResponseSchema>,
}

pub struct CompletionResponse {
    pub content: String,
}

#[async_trait]
pub trait LLM {
    async fn completion<'a>(&self, request: CompletionRequest<'a>) -> Result<CompletionResponse>;

    /// Names of the models the server can serve.
    async fn models(&self) -> Result<Vec<String>>;
}
