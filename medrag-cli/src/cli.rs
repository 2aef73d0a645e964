use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use medrag_engine::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// MedRAG: answers medical questions from your own documents, with citations.
#[derive(Parser, Debug)]
#[command(name = "medrag", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Commands,
}

/// Locations, retrieval knobs and service credentials.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Directory holding the source documents
    #[arg(long, env = "MEDRAG_DATA_DIR", default_value = "data", global = true)]
    pub data_dir: PathBuf,

    /// Directory the vector index is saved in
    #[arg(long, env = "VECTOR_DB_PATH", default_value = "vector_db", global = true)]
    pub vector_db_path: PathBuf,

    /// Directory user records are saved in
    #[arg(long, env = "MEMORY_PATH", default_value = "memory", global = true)]
    pub memory_path: PathBuf,

    /// Number of chunks retrieved per question
    #[arg(long, env = "RETRIEVER_K", default_value_t = 5, global = true)]
    pub top_k: usize,

    /// Number of prior turns included in the context
    #[arg(long, env = "MAX_CONVERSATION_HISTORY", default_value_t = 10, global = true)]
    pub history_turns: usize,

    /// API key for the chat completion service
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true, global = true)]
    pub groq_api_key: Option<String>,

    /// Chat model name
    #[arg(long, env = "GROQ_MODEL", default_value = DEFAULT_MODEL, global = true)]
    pub model: String,

    /// Sampling temperature
    #[arg(long, env = "MODEL_TEMPERATURE", default_value_t = 0.3, global = true)]
    pub temperature: f32,

    /// Base URL of the OpenAI-compatible chat API
    #[arg(long, env = "COMPLETION_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub completion_base_url: String,

    /// API key for an OpenAI-compatible embeddings API; offline hashing
    /// embeddings are used when unset
    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true, global = true)]
    pub embedding_api_key: Option<String>,

    /// Embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", global = true)]
    pub embedding_model: Option<String>,

    /// Base URL of the OpenAI-compatible embeddings API
    #[arg(long, env = "EMBEDDING_BASE_URL", global = true)]
    pub embedding_base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (or extend) the knowledge base from a document directory
    Ingest(IngestArgs),

    /// Ask a question
    Ask(AskArgs),

    /// Show a user's conversation history
    History(HistoryArgs),

    /// Clear a user's conversation history (preferences are kept)
    Clear(UserArgs),

    /// Show or update a user's preferences
    Prefs(PrefsArgs),

    /// Show knowledge base statistics
    Stats,

    /// Remove every chunk of a source document from the knowledge base
    Remove(RemoveArgs),

    /// List users with stored records
    Users,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Directory to load; defaults to <data-dir>/docs
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Add to the existing index instead of rebuilding it
    #[arg(long)]
    pub append: bool,

    /// Chunk window size in characters
    #[arg(long, default_value_t = 1000)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value_t = 200)]
    pub chunk_overlap: usize,
}

#[derive(Args, Debug)]
pub struct UserArgs {
    /// User identifier
    #[arg(long, short)]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct AskArgs {
    #[command(flatten)]
    pub user: UserArgs,

    /// Print the answer as JSON
    #[arg(long)]
    pub json: bool,

    /// The question
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    pub question: Vec<String>,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(flatten)]
    pub user: UserArgs,

    /// Show only the most recent turns
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct PrefsArgs {
    #[command(flatten)]
    pub user: UserArgs,

    /// Display name
    #[arg(long)]
    pub name: Option<String>,

    /// Known condition (repeat to set several; replaces the stored list)
    #[arg(long = "condition")]
    pub conditions: Vec<String>,

    /// Allergy (repeat to set several; replaces the stored list)
    #[arg(long = "allergy")]
    pub allergies: Vec<String>,

    /// Any other preference, as key=value
    #[arg(long = "set", value_parser = parse_key_value)]
    pub extra: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Source identifier as shown by `ask` (relative path)
    pub source: String,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ask_with_multi_word_question() {
        let cli = Cli::try_parse_from(["medrag", "ask", "--user", "alice", "I", "have", "a", "fever"])
            .unwrap();
        let Commands::Ask(args) = cli.command else { panic!("expected ask") };
        assert_eq!(args.user.user, "alice");
        assert_eq!(args.question.join(" "), "I have a fever");
    }

    #[test]
    fn global_settings_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["medrag", "stats", "--top-k", "3", "--vector-db-path", "/tmp/kb"])
            .unwrap();
        assert_eq!(cli.settings.top_k, 3);
        assert_eq!(cli.settings.vector_db_path, PathBuf::from("/tmp/kb"));
    }

    #[test]
    fn prefs_accepts_repeated_flags() {
        let cli = Cli::try_parse_from([
            "medrag", "prefs", "-u", "bob", "--condition", "asthma", "--condition", "diabetes", "--set",
            "language=fr",
        ])
        .unwrap();
        let Commands::Prefs(args) = cli.command else { panic!("expected prefs") };
        assert_eq!(args.conditions, vec!["asthma", "diabetes"]);
        assert_eq!(args.extra, vec![("language".to_string(), "fr".to_string())]);
    }

    #[test]
    fn key_value_requires_equals_and_key() {
        assert!(parse_key_value("language").is_err());
        assert!(parse_key_value("=fr").is_err());
        assert_eq!(parse_key_value("a = b").unwrap(), ("a".to_string(), "b".to_string()));
    }
}
