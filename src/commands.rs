use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use indicatif::ProgressBar;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::embeddings::EmbeddingClient;
use crate::index::HnswIndex;
use crate::indexer::IndexBuilder;
use crate::llm::ChatClient;
use crate::markdown::render_markdown;
use crate::retriever::{ChatHistory, ConversationalRetriever};
use crate::scanner::FileSystemSource;

const EXIT_SENTINEL: &str = "exit";

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Build and persist a searchable index for the repository at `root`.
#[inline]
pub fn run_index(root: &Path, output: &Path, config: &Config) -> Result<()> {
    let api_key = config.openai.api_key()?;
    let embedder = EmbeddingClient::new(&config.openai, api_key)?;
    let source = FileSystemSource::new(root);

    info!("Indexing {} into {}", root.display(), output.display());

    let bar = spinner("Indexing repository");
    let result = IndexBuilder::new(config, embedder).build(&source, output, |stage| {
        bar.set_message(stage.to_string());
    });
    bar.finish_and_clear();

    let stats = result.context("Indexing failed; no artifacts were written")?;

    println!("Indexing complete.");
    println!("  Documents scanned: {}", stats.documents);
    println!("  Chunks created: {}", stats.chunks);
    println!("  Embeddings generated: {}", stats.embeddings);
    println!("  Index written to: {}", output.display());
    println!("  Duration: {:?}", stats.duration);

    Ok(())
}

/// Interactive question/answer loop over a previously built index.
///
/// One question is processed end-to-end before the next is accepted; the
/// literal `exit` input terminates the loop between turns. A failed turn is
/// reported and the session keeps accepting questions.
#[inline]
pub async fn run_query(index_dir: &Path, config: &Config) -> Result<()> {
    let api_key = config.openai.api_key()?;

    let bar = spinner("Loading index");
    let index = HnswIndex::load(index_dir)?;
    bar.finish_and_clear();

    let embedder = EmbeddingClient::new(&config.openai, api_key.clone())?;
    let chat = ChatClient::new(&config.openai, api_key)?;
    let project = config.project.clone();
    let mut retriever = ConversationalRetriever::new(&index, embedder, chat, project);
    let mut history = ChatHistory::new();

    let name = &config.project.name;
    println!(
        "{}",
        style(format!("Welcome to the {name} chatbot.")).blue().bold()
    );
    println!(
        "Ask any questions related to the {name} codebase, and I'll try to help. Type '{EXIT_SENTINEL}' to quit.\n"
    );

    loop {
        let question: String = Input::new()
            .with_prompt(style(format!("How can I help with {name}?")).yellow().to_string())
            .allow_empty(true)
            .interact_text()
            .context("Failed to read question")?;
        let question = question.trim().to_string();

        if question == EXIT_SENTINEL {
            break;
        }
        if question.is_empty() {
            continue;
        }

        let bar = spinner("Thinking...");
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        // Print tokens as they arrive; the spinner stops at the first one.
        let stream_bar = bar.clone();
        let printer = tokio::spawn(async move {
            let mut first = true;
            while let Some(token) = rx.recv().await {
                if first {
                    stream_bar.finish_and_clear();
                    first = false;
                }
                print!("{token}");
                let _ = std::io::stdout().flush();
            }
        });

        let result = retriever.answer(&question, &mut history, &tx).await;
        drop(tx);
        let _ = printer.await;
        bar.finish_and_clear();

        match result {
            Ok(answer) => {
                println!("\n");
                println!("{}", render_markdown(&answer));
                println!();
            }
            Err(e) => {
                println!("{}", style(format!("Something went wrong: {e}")).red());
            }
        }
    }

    Ok(())
}
