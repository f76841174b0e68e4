//! inference-chat CLI - talk to a self-hosted inference daemon.

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use inference_chat::{
    select_model, Command, Conversation, InferenceClient, Role, DEFAULT_MODEL, DEFAULT_PORT,
};

/// inference-chat - interactive chat against a self-hosted inference API.
#[derive(Parser)]
#[command(name = "inference-chat")]
#[command(about = "Interactive chat against a self-hosted inference API")]
#[command(version)]
struct Cli {
    /// Daemon host name or address.
    #[arg(short = 'H', long, env = "INFERENCE_CHAT_HOST", default_value = "localhost")]
    host: String,

    /// Daemon port.
    #[arg(short, long, env = "INFERENCE_CHAT_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Model to chat with; falls back to the first installed model.
    #[arg(short, long, env = "INFERENCE_CHAT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Start with streaming responses enabled.
    #[arg(long)]
    stream: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

struct Session {
    client: InferenceClient,
    conversation: Conversation,
    stream: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let endpoint = format!("{}:{}", cli.host, cli.port);
    let client = InferenceClient::for_host(&cli.host, cli.port);

    print_section(&format!("Inference chat ({endpoint})"));
    if !client.check_connection().await {
        print_error(&format!("Cannot reach the inference API at {}", client.base_url()));
        println!("  Check that:");
        println!("    1. the host is running and bootstrap has finished");
        println!("    2. the daemon is listening on port {}", cli.port);
        println!("    3. your address is inside the host's allowed CIDR");
        bail!("connection check failed for {endpoint}");
    }
    print_success("Connected");

    let installed = match client.list_models().await {
        Ok(models) => models,
        Err(e) => {
            warn!(error = %e, "Could not list models");
            Vec::new()
        }
    };
    let model = match select_model(&cli.model, &installed) {
        Some(model) if model == cli.model => model.to_string(),
        Some(model) => {
            print_warning(&format!("Model {} is not installed, using {model}", cli.model));
            model.to_string()
        }
        None => {
            print_warning("No models installed; pull one on the host first");
            cli.model.clone()
        }
    };

    println!("  {} {}", "Model:".bright_black(), model.green());
    println!("  {}", "Type /help for commands.".bright_black());

    let mut session = Session {
        client,
        conversation: Conversation::new(model, endpoint),
        stream: cli.stream,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n{} ", "You:".blue().bold());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match Command::parse(input) {
            Some(command) => {
                if !session.handle(command).await {
                    break;
                }
            }
            None => session.send(input).await?,
        }
    }

    offer_save(&session.conversation);
    println!("Goodbye.");
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl Session {
    /// Run a slash command. Returns `false` when the chat should end.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Help => println!("{}", Command::help()),
            Command::Models => match self.client.list_models().await {
                Ok(models) if models.is_empty() => print_warning("No models installed"),
                Ok(models) => {
                    for name in models {
                        let marker = if name == self.conversation.model { "*" } else { " " };
                        println!("  {marker} {name}");
                    }
                }
                Err(e) => print_error(&format!("Could not list models: {e}")),
            },
            Command::Model(None) => print_warning("Usage: /model <name>"),
            Command::Model(Some(name)) => match self.client.list_models().await {
                Ok(models) if models.contains(&name) => {
                    self.conversation.model.clone_from(&name);
                    print_success(&format!("Switched to {name}"));
                }
                Ok(_) => print_warning(&format!("Model {name} is not installed")),
                Err(e) => print_error(&format!("Could not list models: {e}")),
            },
            Command::Save(file) => {
                let path = file.map_or_else(|| self.conversation.default_filename(), PathBuf::from);
                match self.conversation.save(&path) {
                    Ok(()) => print_success(&format!("Saved to {}", path.display())),
                    Err(e) => print_error(&format!("{e:#}")),
                }
            }
            Command::Load(None) => print_warning("Usage: /load <file>"),
            Command::Load(Some(file)) => match self.conversation.load(&PathBuf::from(&file)) {
                Ok(count) => print_success(&format!("Loaded {count} message(s) from {file}")),
                Err(e) => print_error(&format!("{e:#}")),
            },
            Command::Clear => {
                self.conversation.clear();
                print_success("History cleared");
            }
            Command::Stats => {
                let stats = self.conversation.stats();
                let secs = stats.duration.num_seconds().max(0);
                let rows = [
                    ("Duration:", format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)),
                    ("Messages:", stats.messages.to_string()),
                    ("Model:", stats.model),
                    ("Host:", stats.host),
                    ("Started:", stats.started.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
                ];
                for (label, value) in rows {
                    println!("  {:<10} {}", label.bright_black(), value);
                }
            }
            Command::ToggleStream => {
                self.stream = !self.stream;
                let state = if self.stream { "on" } else { "off" };
                print_success(&format!("Streaming {state}"));
            }
            Command::History => {
                if self.conversation.is_empty() {
                    println!("  {}", "(empty)".bright_black());
                }
                for (i, (role, text)) in self.conversation.preview().into_iter().enumerate() {
                    let role = match role {
                        Role::User => "You".blue(),
                        Role::Assistant => "Assistant".green(),
                    };
                    println!("  [{}] {role}: {text}", i + 1);
                }
            }
            Command::Quit => return false,
            Command::Unknown(word) => {
                print_warning(&format!("Unknown command {word}; type /help"));
            }
        }
        true
    }

    async fn send(&mut self, prompt: &str) -> Result<()> {
        self.conversation.push(Role::User, prompt);
        let model = self.conversation.model.clone();
        let started = Instant::now();

        print!("{} ", "Assistant:".green().bold());
        std::io::stdout().flush()?;

        let result = if self.stream {
            self.client
                .generate_stream(&model, prompt, |fragment| {
                    print!("{fragment}");
                    if let Err(e) = std::io::stdout().flush() {
                        warn!(error = %e, "Failed to flush stdout");
                    }
                })
                .await
        } else {
            self.client.generate(&model, prompt).await.inspect(|response| {
                print!("{}", response.response);
            })
        };
        println!();

        match result {
            Ok(response) => {
                debug!(model = %model, eval_count = ?response.eval_count, "Response complete");
                self.conversation.push(Role::Assistant, response.response);
                println!(
                    "{}",
                    format!("[Response time: {:.2}s]", started.elapsed().as_secs_f64()).bright_black()
                );
            }
            Err(e) if e.is_connection() => {
                print_error(&format!("Lost connection to {}: {e}", self.client.base_url()));
            }
            Err(e) => print_error(&e.to_string()),
        }
        Ok(())
    }
}

fn offer_save(conversation: &Conversation) {
    if conversation.is_empty() || !std::io::stdin().is_terminal() {
        return;
    }

    let save = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Save conversation?")
        .default(false)
        .interact()
        .unwrap_or(false);
    if !save {
        return;
    }

    let path = conversation.default_filename();
    match conversation.save(&path) {
        Ok(()) => print_success(&format!("Saved to {}", path.display())),
        Err(e) => print_error(&format!("{e:#}")),
    }
}

fn print_section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
    println!("{}", "─".repeat(60).bright_black());
}

fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}
