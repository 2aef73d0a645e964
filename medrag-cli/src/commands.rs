use std::sync::Arc;

use anyhow::{Context, Result, bail};
use medrag_memory::PreferencePatch;
use medrag_rag::{DocumentLoader, FixedSizeChunker, Ingestor, RagConfig, TextDirectoryLoader, VectorIndex};
use tracing::info;

use crate::app::{self, INDEX_KEY};
use crate::cli::{AskArgs, Cli, Commands, HistoryArgs, IngestArgs, PrefsArgs, RemoveArgs, Settings, UserArgs};

/// Execute the parsed command line.
pub async fn execute(cli: Cli) -> Result<()> {
    let settings = &cli.settings;
    match cli.command {
        Commands::Ingest(args) => ingest(settings, args).await,
        Commands::Ask(args) => ask(settings, args).await,
        Commands::History(args) => history(settings, args).await,
        Commands::Clear(args) => clear(settings, args).await,
        Commands::Prefs(args) => prefs(settings, args).await,
        Commands::Stats => stats(settings).await,
        Commands::Remove(args) => remove(settings, args).await,
        Commands::Users => users(settings).await,
    }
}

async fn ingest(settings: &Settings, args: IngestArgs) -> Result<()> {
    let config = RagConfig::builder()
        .chunk_size(args.chunk_size)
        .chunk_overlap(args.chunk_overlap)
        .build()?;
    let source = args.source.unwrap_or_else(|| settings.data_dir.join("docs"));
    let source = source.to_str().context("document directory path is not valid UTF-8")?;

    let documents = TextDirectoryLoader::new().load(source).await?;
    if documents.is_empty() {
        bail!("no .txt or .md documents found in {source}");
    }

    let ingestor = Ingestor::new(
        Arc::new(FixedSizeChunker::from_config(&config)?),
        app::embedding_provider(settings)?,
    );
    let (index, report) = if args.append {
        let index = app::load_index(settings).await?;
        let report = ingestor.extend_index(&index, &documents).await?;
        (index, report)
    } else {
        let index = VectorIndex::new(config.metric);
        let report = ingestor.build_index(&index, &documents).await?;
        (index, report)
    };

    index.save(&app::index_storage(settings), INDEX_KEY).await?;
    println!(
        "Indexed {} chunks from {} documents into {}",
        report.chunks_indexed,
        report.documents_indexed,
        settings.vector_db_path.display()
    );
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.source, skipped.reason);
    }
    Ok(())
}

async fn ask(settings: &Settings, args: AskArgs) -> Result<()> {
    let engine = app::orchestrator(settings).await?;
    let question = args.question.join(" ");
    let answer = engine.ask(&args.user.user, &question).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}\n", answer.text);
    if !answer.sources.is_empty() {
        println!("Sources: {}", answer.sources.join(", "));
    }
    println!("Confidence: {}", answer.confidence);
    Ok(())
}

async fn history(settings: &Settings, args: HistoryArgs) -> Result<()> {
    let memory = app::memory_store(settings);
    let turns = match args.limit {
        Some(limit) => memory.recent_history(&args.user.user, limit).await?,
        None => memory.history(&args.user.user).await?,
    };

    if turns.is_empty() {
        println!("No conversation history for {}", args.user.user);
    }
    for turn in turns {
        println!("[{}]", turn.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("You: {}", turn.user_message);
        println!("Assistant: {}", turn.bot_response);
        if !turn.cited_sources.is_empty() {
            println!("Sources: {}", turn.cited_sources.join(", "));
        }
        println!();
    }
    Ok(())
}

async fn clear(settings: &Settings, args: UserArgs) -> Result<()> {
    app::memory_store(settings).clear(&args.user).await?;
    println!("Cleared conversation history for {}", args.user);
    Ok(())
}

async fn prefs(settings: &Settings, args: PrefsArgs) -> Result<()> {
    let memory = app::memory_store(settings);
    let mut patch = PreferencePatch::new();
    if let Some(name) = args.name {
        patch = patch.with_display_name(name);
    }
    if !args.conditions.is_empty() {
        patch = patch.with_known_conditions(args.conditions);
    }
    if !args.allergies.is_empty() {
        patch = patch.with_allergies(args.allergies);
    }
    for (key, value) in args.extra {
        patch = patch.with_extra(key, value);
    }

    let preferences = if patch.is_empty() {
        memory.preferences(&args.user.user).await?
    } else {
        let updated = memory.update_preferences(&args.user.user, patch).await?;
        info!(user_id = %args.user.user, "preferences saved");
        updated
    };
    println!("{}", serde_json::to_string_pretty(&preferences)?);
    Ok(())
}

async fn stats(settings: &Settings) -> Result<()> {
    let stats = app::load_index(settings).await?.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn remove(settings: &Settings, args: RemoveArgs) -> Result<()> {
    let index = app::load_index(settings).await?;
    let removed = index.remove_source(&args.source).await;
    if removed == 0 {
        bail!("no chunks from '{}' in the knowledge base", args.source);
    }
    index.save(&app::index_storage(settings), INDEX_KEY).await?;
    println!("Removed {removed} chunks from {}", args.source);
    Ok(())
}

async fn users(settings: &Settings) -> Result<()> {
    for user in app::memory_store(settings).list_users().await? {
        println!("{user}");
    }
    Ok(())
}
