//! `llmstream chat`: stream one completion into an in-memory post and render
//! it on the terminal. Ctrl-C cancels the stream and keeps the partial answer.

mod args;
mod console;
mod tools;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use llmstream_harness::prelude::*;
use llmstream_harness::vendors::anthropic::{AnthropicClientConfig, AnthropicProvider};
use llmstream_harness::vendors::bedrock::BedrockProvider;
use llmstream_harness::vendors::openai::{OpenAiApi, OpenAiClientConfig, OpenAiProvider};
use llmstream_harness::ProviderAdapter;
use llmstream_post::{
    Artifact, MemoryPostStore, Post, PostStreamer, StreamStatus, TracingMeter,
    init_observability,
};
use tracing::info;

use crate::args::{ChatArgs, Cli, Command, ProviderKind};
use crate::console::ConsoleSink;

fn load_env(extra: Option<&str>) {
    if let Some(path) = extra {
        let _ = dotenvy::from_path(path);
    }
    let _ = dotenvy::dotenv();
}

fn build_provider(args: &ChatArgs) -> anyhow::Result<Arc<dyn ProviderAdapter>> {
    let provider: Arc<dyn ProviderAdapter> = match args.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            AnthropicClientConfig::from_env()?.web_search(args.web_search),
        )?),
        ProviderKind::Bedrock => Arc::new(BedrockProvider::from_env()?),
        ProviderKind::OpenaiChat => Arc::new(OpenAiProvider::new(
            OpenAiClientConfig::from_env()?.api(OpenAiApi::ChatCompletions),
        )?),
        ProviderKind::OpenaiResponses => Arc::new(OpenAiProvider::new(
            OpenAiClientConfig::from_env()?
                .api(OpenAiApi::Responses)
                .web_search(args.web_search),
        )?),
    };
    Ok(provider)
}

fn build_request(args: &ChatArgs) -> CompletionRequest {
    let mut conversation = Conversation::new();
    if let Some(system) = &args.system {
        conversation.push(Turn::system(system.clone()));
    }
    conversation.push(Turn::user(args.prompt.clone()));

    let mut config = GenerationConfig::new(args.model.clone()).max_tokens(args.max_tokens);
    if let Some(temperature) = args.temperature {
        config = config.temperature(temperature);
    }
    if args.reasoning || args.reasoning_budget.is_some() {
        config = config.reasoning(args.reasoning_budget);
    }

    let request = CompletionRequest::new(conversation, config);
    if args.tools {
        request.with_tools(tools::definitions())
    } else {
        request
    }
}

async fn chat(args: ChatArgs) -> anyhow::Result<()> {
    let provider = build_provider(&args)?;
    let provider_id = provider.id();
    let harness = Harness::builder().register_provider(provider).build()?;

    let request = build_request(&args);
    let stream = if args.tools {
        harness
            .tool_cycle(&provider_id, Arc::new(tools::BuiltinTools))?
            .run(request)?
    } else {
        harness.stream(&provider_id, request)?
    };

    let store = Arc::new(MemoryPostStore::new());
    let streamer = PostStreamer::new(store, Arc::new(ConsoleSink::new()), Arc::new(TracingMeter));
    let post = Post::new(uuid::Uuid::new_v4().to_string(), "cli", "llmstream");
    let post_id = post.id.clone();
    info!(post_id = %post_id, provider = %provider_id, model = %args.model, "chat started");

    let (_handle, mut task) = streamer.spawn(post, stream)?;
    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            streamer.stop(&post_id);
            task.await
        }
    };
    let outcome = joined.context("stream task panicked")??;
    println!();

    let artifacts: Vec<Artifact> = outcome
        .post
        .prop(llmstream_post::post::PROP_ARTIFACTS)
        .unwrap_or_default();
    for artifact in &artifacts {
        eprintln!(
            "\n--- artifact: {} ({}) ---\n{}\n---",
            artifact.title, artifact.language, artifact.content
        );
    }

    match outcome.status {
        StreamStatus::Failed(err) => Err(anyhow::Error::new(err).context("stream failed")),
        StreamStatus::Cancelled => {
            eprintln!("(cancelled)");
            Ok(())
        }
        StreamStatus::Completed | StreamStatus::ToolCallsPending(_) => Ok(()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    load_env(cli.env_file.as_deref());
    init_observability();

    match cli.command {
        Command::Chat(args) => chat(args).await,
    }
}
