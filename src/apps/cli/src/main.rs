mod commands;
mod logging;

use clap::{Parser, Subcommand};
use commands::run::RunArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "distill", version, about = "Distill a book into sections with Gemini")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (overridden by DISTILL_LOG_LEVEL)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file to use instead of the one in the config dir
    #[arg(long = "settings", global = true, value_name = "FILE")]
    settings_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Distill a book file
    Run(RunArgs),

    /// Show or change saved settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },

    /// Manage saved API keys
    Keys {
        #[command(subcommand)]
        action: Option<KeysAction>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings
    Show,
    /// Change one setting (model, prompt-file, temperature, use-temperature, auto-wait, theme, api-key)
    Set { key: String, value: String },
    /// Restore the built-in prompt
    ResetPrompt,
}

#[derive(Subcommand)]
enum KeysAction {
    /// List saved keys
    List,
    /// Save the active API key under a label
    Add { label: String },
    /// Delete a saved key by its list number
    Remove { index: usize },
    /// Make a saved key the active one
    Use { index: usize },
    /// Forget the active key
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let store = commands::open_store(cli.settings_file.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run::run(&store, args).await,
        Commands::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => commands::settings::show(&store),
            SettingsAction::Set { key, value } => commands::settings::set(&store, &key, &value),
            SettingsAction::ResetPrompt => commands::settings::reset_prompt(&store),
        },
        Commands::Keys { action } => match action.unwrap_or(KeysAction::List) {
            KeysAction::List => commands::settings::list_keys(&store),
            KeysAction::Add { label } => commands::settings::add_key(&store, &label),
            KeysAction::Remove { index } => commands::settings::remove_key(&store, index),
            KeysAction::Use { index } => commands::settings::use_key(&store, index),
            KeysAction::Clear => commands::settings::clear_key(&store),
        },
    }
}
