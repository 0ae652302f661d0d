use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "llmstream")]
#[command(about = "Stream LLM completions into a console-rendered post", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Extra `.env` file loaded before the environment is read.
    #[arg(long, global = true)]
    pub env_file: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one prompt and stream the answer.
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    #[arg(long, value_enum, default_value_t = ProviderKind::Anthropic)]
    pub provider: ProviderKind,

    #[arg(long)]
    pub model: String,

    #[arg(long, default_value_t = 4096)]
    pub max_tokens: u32,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Enable reasoning / extended thinking.
    #[arg(long)]
    pub reasoning: bool,

    /// Explicit reasoning budget in tokens (implies --reasoning).
    #[arg(long)]
    pub reasoning_budget: Option<u32>,

    /// Offer the built-in tools and resolve calls automatically.
    #[arg(long)]
    pub tools: bool,

    /// Enable the vendor's web search tool where supported.
    #[arg(long)]
    pub web_search: bool,

    #[arg(long)]
    pub system: Option<String>,

    pub prompt: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    Anthropic,
    Bedrock,
    OpenaiChat,
    OpenaiResponses,
}
