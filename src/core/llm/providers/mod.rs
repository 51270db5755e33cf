pub mod bedrock;
pub mod openai;

pub use bedrock::BedrockProvider;
pub use openai::OpenAiProvider;
