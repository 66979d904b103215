use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};

use murmur_core_sdk::prelude::*;
use murmur_core_sdk::{config, db};

/**
 * \brief Terminal front end over the conversation controller.
 */
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about = "Murmur terminal chat")]
struct Cli {
    /** \brief Database file holding the conversation and preferences. */
    #[arg(long, global = true, env = "MURMUR_DB_PATH", default_value = db::DEFAULT_DB_PATH)]
    db: PathBuf,
    #[arg(long, global = true, env = config::ENV_GRAPHQL_URL)]
    graphql_url: Option<String>,
    #[arg(long, global = true, env = config::ENV_REST_URL)]
    rest_url: Option<String>,
    #[arg(long, global = true, env = config::ENV_PROVIDER)]
    provider: Option<String>,
    #[arg(long, global = true, env = config::ENV_MODEL)]
    model: Option<String>,
    #[arg(long, global = true, env = config::ENV_TEMPERATURE)]
    temperature: Option<String>,
    /** \brief Write events to logs/murmur.log. */
    #[arg(long, global = true, env = "MURMUR_TELEMETRY", default_value_t = false)]
    telemetry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief Send one prompt, or chat interactively when no prompt is given.
     * \details Ctrl-C cancels the reply in flight. `/clear` and `/quit` work in the interactive loop.
     */
    Chat {
        #[arg(long)]
        prompt: Option<String>,
    },
    /** \brief Print the conversation. */
    History,
    /** \brief Delete the whole conversation. */
    Clear,
    /** \brief Show or set the theme preference. */
    Theme { value: Option<ThemeArg> },
    /** \brief Show which backend the configuration selects. */
    Backend,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ThemeArg {
    Light,
    Dark,
}

impl From<ThemeArg> for Theme {
    fn from(value: ThemeArg) -> Self {
        match value {
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::set_enabled(cli.telemetry);

    let store = SqliteStore::open(&cli.db).context("open database failed")?;
    let controller = ChatController::init(store, chat_config(&cli));

    match cli.command {
        Commands::Chat { prompt: Some(prompt) } => {
            send_and_print(&controller, &prompt).await;
        }
        Commands::Chat { prompt: None } => {
            interactive(&controller).await?;
        }
        Commands::History => {
            for message in controller.visible_messages() {
                print_message(&message);
            }
        }
        Commands::Clear => {
            controller.clear();
            println!("Conversation cleared");
        }
        Commands::Theme { value: Some(value) } => {
            let theme = Theme::from(value);
            controller.set_theme(theme).context("save theme failed")?;
            println!("Theme set to {}", theme.as_str());
        }
        Commands::Theme { value: None } => {
            println!("{}", controller.theme(false).as_str());
        }
        Commands::Backend => {
            let backend = controller.backend();
            match backend.endpoint() {
                Some(endpoint) => println!("{} -> {}", backend.label(), endpoint),
                None => println!("{}", backend.label()),
            }
        }
    }

    Ok(())
}

fn chat_config(cli: &Cli) -> ChatConfig {
    ChatConfig::from_lookup(|key| match key {
        config::ENV_GRAPHQL_URL => cli.graphql_url.clone(),
        config::ENV_REST_URL => cli.rest_url.clone(),
        config::ENV_PROVIDER => cli.provider.clone(),
        config::ENV_MODEL => cli.model.clone(),
        config::ENV_TEMPERATURE => cli.temperature.clone(),
        _ => None,
    })
}

async fn interactive(controller: &ChatController<SqliteStore>) -> Result<()> {
    let backend = controller.backend();
    println!(
        "murmur ({}) - {} messages restored, /quit to exit",
        backend.label(),
        controller.messages().len()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("read stdin failed")? else {
            break;
        };
        match line.trim() {
            "/quit" => break,
            "/clear" => {
                controller.clear();
                println!("Conversation cleared");
            }
            "/history" => {
                for message in controller.visible_messages() {
                    print_message(&message);
                }
            }
            _ => send_and_print(controller, &line).await,
        }
    }
    Ok(())
}

async fn send_and_print(controller: &ChatController<SqliteStore>, text: &str) {
    let send = controller.begin_send(text);
    tokio::pin!(send);
    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            _ = tokio::signal::ctrl_c() => {
                if controller.cancel() {
                    eprintln!("cancelling...");
                }
            }
        }
    };
    match result {
        Ok(settled) => print_message(&settled.reply),
        Err(InvalidInput::Empty) => {}
        Err(err) => eprintln!("{}", err),
    }
}

fn print_message(message: &Message) {
    let label = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
    };
    println!("[{}] {}", label, message.content);
}
