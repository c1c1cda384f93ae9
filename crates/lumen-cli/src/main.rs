use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use lumen_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use lumen_contracts::events::EventWriter;
use lumen_contracts::models::{ModelSelector, CAPABILITY_IMAGE, CAPABILITY_TEXT};
use lumen_contracts::options::EnrichmentOptions;
use lumen_contracts::transcript::{load_transcript, write_transcript};
use lumen_engine::backends::{DryrunImageBackend, DryrunTextBackend};
use lumen_engine::{Backends, EngineConfig, Orchestrator, PipelineOutcome};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "lumen", version, about = "Conversational assistant over Gemini and Groq")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat shell.
    Chat(ChatArgs),
    /// Send one message and print the settled reply.
    Ask(AskArgs),
}

#[derive(Debug, Clone, Args)]
struct BackendArgs {
    /// Use offline backends; no network calls are made.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    /// Append pipeline events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    backend: BackendArgs,
    /// Continue a conversation previously saved with /export.
    #[arg(long)]
    resume: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct AskArgs {
    #[command(flatten)]
    backend: BackendArgs,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    web_search: bool,
    #[arg(long)]
    reasoning: bool,
    #[arg(long)]
    thinking: bool,
    #[arg(long)]
    tool: Option<String>,
    /// Image file to attach; repeatable.
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long)]
    role: Option<String>,
}

const IMAGE_REFERENCE_PREVIEW_CHARS: usize = 48;

fn main() {
    init_logging();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lumen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Ask(args) => run_ask(args),
    }
}

fn build_orchestrator(args: &BackendArgs) -> Result<Orchestrator> {
    let mut config = EngineConfig::from_env();
    let selector = ModelSelector::new(None);

    let requested_text = args.text_model.clone().unwrap_or_else(|| config.text_model.clone());
    let text = selector
        .select(Some(requested_text.as_str()), CAPABILITY_TEXT)
        .map_err(anyhow::Error::msg)?;
    let requested_image = args.image_model.clone().unwrap_or_else(|| config.image_model.clone());
    let image = selector
        .select(Some(requested_image.as_str()), CAPABILITY_IMAGE)
        .map_err(anyhow::Error::msg)?;
    for reason in [&text.fallback_reason, &image.fallback_reason].into_iter().flatten() {
        warn!(reason = %reason, "model fallback");
        println!("Model fallback: {reason} Using default.");
    }
    config.text_model = text.model.name.clone();
    config.image_model = image.model.name.clone();

    let offline_text = args.dryrun || text.model.is_dryrun();
    let offline_image = args.dryrun || image.model.is_dryrun();
    if !offline_text && config.gemini_api_key.is_none() {
        println!("GEMINI_API_KEY is not set; replies will fail. Pass --dryrun to run offline.");
    }

    let mut backends = if args.dryrun {
        Backends::dryrun()
    } else {
        Backends::live(&config)
    };
    if offline_text {
        backends.text = Arc::new(DryrunTextBackend);
    }
    if offline_image {
        backends.image = Arc::new(DryrunImageBackend);
    }
    info!(
        text = backends.text.name(),
        search = backends.search.name(),
        image = backends.image.name(),
        ?config,
        "backends ready"
    );

    let events = match args.events.as_ref() {
        Some(path) => EventWriter::new(path, Uuid::new_v4().to_string()),
        None => EventWriter::disabled(),
    };
    Ok(Orchestrator::new(config, backends, events))
}

/// Toggles carried between chat lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ChatSettings {
    use_web_search: bool,
    use_reasoning: bool,
    use_thinking: bool,
    attachments: Vec<String>,
}

impl ChatSettings {
    /// Options for one send. Attachments go out with the next message only.
    fn take_options(&mut self, tool: Option<String>) -> EnrichmentOptions {
        EnrichmentOptions {
            images: std::mem::take(&mut self.attachments),
            use_reasoning: self.use_reasoning,
            use_web_search: self.use_web_search,
            use_thinking: self.use_thinking,
            tool,
        }
    }

    fn apply_toggles(&mut self, intent: &Intent) -> Vec<String> {
        let mut changes = Vec::new();
        for (key, value) in &intent.settings_update {
            let (label, flag) = match key.as_str() {
                "use_web_search" => ("Web search", &mut self.use_web_search),
                "use_reasoning" => ("Reasoning", &mut self.use_reasoning),
                "use_thinking" => ("Thinking", &mut self.use_thinking),
                _ => continue,
            };
            *flag = match value {
                Value::Bool(enabled) => *enabled,
                _ => !*flag,
            };
            changes.push(format!("{label} {}", on_off(*flag)));
        }
        changes
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut orchestrator = build_orchestrator(&args.backend)?;
    if let Some(path) = args.resume.as_ref() {
        let transcript = load_transcript(path)?;
        println!(
            "Resumed \"{}\" ({} messages).",
            transcript.conversation.title,
            transcript.messages.len()
        );
        orchestrator = orchestrator.with_store(transcript.into_store());
    }

    let stdin = io::stdin();
    let mut line = String::new();
    let mut settings = ChatSettings::default();

    println!("Lumen chat started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        if intent.action == "noop" {
            continue;
        }

        match intent.action.as_str() {
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "quit" => break,
            "new_conversation" => {
                let conversation = orchestrator.new_conversation();
                settings.attachments.clear();
                println!("Started a new conversation ({}).", conversation.id);
            }
            "list_roles" => {
                let active = orchestrator.active_role().map(|role| role.id.clone());
                for role in orchestrator.roles().list() {
                    let marker = if active.as_deref() == Some(role.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {} - {}: {}", role.id, role.name, role.description);
                }
            }
            "add_role" => {
                let name = value_as_non_empty_string(intent.command_args.get("name"));
                let description = value_as_non_empty_string(intent.command_args.get("description"));
                let (Some(name), Some(description)) = (name, description) else {
                    println!("/role requires a name and a description");
                    continue;
                };
                match orchestrator.add_custom_role(&name, &description) {
                    Ok(role) => {
                        if let Err(err) = orchestrator.use_role(Some(&role.id)) {
                            println!("{err}");
                            continue;
                        }
                        println!("Added role {} ({}) and made it active.", role.name, role.id);
                    }
                    Err(err) => println!("{err}"),
                }
            }
            "use_role" => {
                let role_id = value_as_non_empty_string(intent.command_args.get("role"));
                match orchestrator.use_role(role_id.as_deref()) {
                    Ok(Some(role)) => println!("Active role: {}", role.name),
                    Ok(None) => println!("Active role cleared."),
                    Err(err) => println!("{err}"),
                }
            }
            "set_toggle" => {
                for change in settings.apply_toggles(&intent) {
                    println!("{change}");
                }
            }
            "attach_image" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path")) else {
                    println!("/attach requires an image path");
                    continue;
                };
                match image_data_url(Path::new(&path)) {
                    Ok(url) => {
                        settings.attachments.push(url);
                        println!(
                            "Attached {path} ({} pending for the next message).",
                            settings.attachments.len()
                        );
                    }
                    Err(err) => println!("Attach failed: {err:#}"),
                }
            }
            "export" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path")) else {
                    println!("/export requires a file path");
                    continue;
                };
                let store = orchestrator.store();
                let written = match store.lock() {
                    Ok(store) => write_transcript(Path::new(&path), &store),
                    Err(poisoned) => write_transcript(Path::new(&path), &poisoned.into_inner()),
                };
                match written {
                    Ok(()) => println!("Transcript written to {path}"),
                    Err(err) => println!("Export failed: {err:#}"),
                }
            }
            "status" => print_status(&orchestrator, &settings),
            "run_tool" => {
                let tool = value_as_non_empty_string(intent.command_args.get("tool"));
                let request = value_as_non_empty_string(intent.command_args.get("request"));
                let (Some(tool), Some(request)) = (tool, request) else {
                    println!("/tool requires a tool name and a request");
                    continue;
                };
                let options = settings.take_options(Some(tool));
                let outcome = orchestrator.process_message(&request, &options);
                print_outcome(&outcome);
            }
            "chat" => {
                let Some(prompt) = intent.prompt.as_deref() else {
                    continue;
                };
                let options = settings.take_options(None);
                let outcome = orchestrator.process_message(prompt, &options);
                print_outcome(&outcome);
            }
            _ => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_else(|| intent.action.clone());
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }

    Ok(())
}

fn run_ask(args: AskArgs) -> Result<i32> {
    let mut orchestrator = build_orchestrator(&args.backend)?;
    if let Some(role) = args.role.as_deref() {
        orchestrator.use_role(Some(role)).map_err(anyhow::Error::msg)?;
    }
    let images = args
        .images
        .iter()
        .map(|path| image_data_url(path))
        .collect::<Result<Vec<String>>>()?;
    let options = EnrichmentOptions {
        images,
        use_reasoning: args.reasoning,
        use_web_search: args.web_search,
        use_thinking: args.thinking,
        tool: args.tool.clone(),
    };

    let outcome = orchestrator.process_message(&args.prompt, &options);
    print_outcome(&outcome);
    if outcome.is_failure() {
        if let Some(err) = outcome.error.as_ref() {
            eprintln!("lumen error: {err}");
        }
        return Ok(1);
    }
    Ok(0)
}

fn print_status(orchestrator: &Orchestrator, settings: &ChatSettings) {
    let config = orchestrator.config();
    let store = orchestrator.store();
    let (title, messages) = match store.lock() {
        Ok(store) => (store.active().title.clone(), store.messages().len()),
        Err(poisoned) => {
            let store = poisoned.into_inner();
            (store.active().title.clone(), store.messages().len())
        }
    };
    println!("Conversation: {title} ({messages} messages)");
    println!(
        "Role: {}",
        orchestrator
            .active_role()
            .map(|role| role.name.as_str())
            .unwrap_or("none")
    );
    println!(
        "Web search {} | Reasoning {} | Thinking {}",
        on_off(settings.use_web_search),
        on_off(settings.use_reasoning),
        on_off(settings.use_thinking)
    );
    println!(
        "Models: text={} search={} image={}",
        config.text_model, config.search_model, config.image_model
    );
    if !settings.attachments.is_empty() {
        println!("Pending attachments: {}", settings.attachments.len());
    }
}

fn print_outcome(outcome: &PipelineOutcome) {
    let message = &outcome.message;
    if let Some(thinking) = message.thinking.as_deref() {
        println!("--- thinking ---\n{thinking}\n");
    }
    if let Some(reasoning) = message.reasoning.as_deref() {
        println!("--- reasoning ---\n{reasoning}\n");
    }
    println!("{}", message.content);
    if let Some(record) = message.web_search.as_ref() {
        println!();
        for (index, result) in record.results.iter().enumerate() {
            println!("[{}] {} <{}>", index + 1, result.title, result.link);
        }
    }
    for reference in &message.images {
        println!("[image] {}", preview_reference(reference));
    }
    if let Some(title) = outcome.title.as_deref() {
        println!("(conversation titled \"{title}\")");
    }
}

fn preview_reference(reference: &str) -> String {
    let count = reference.chars().count();
    if count <= IMAGE_REFERENCE_PREVIEW_CHARS {
        return reference.to_string();
    }
    let head: String = reference.chars().take(IMAGE_REFERENCE_PREVIEW_CHARS).collect();
    format!("{head}... ({count} chars, /export to keep it)")
}

/// Reads an image file into a `data:<mime>;base64,` URL, sniffing the
/// format from the bytes.
fn image_data_url(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read image {}", path.display()))?;
    let format = image::guess_format(&bytes)
        .with_context(|| format!("{} is not a recognized image", path.display()))?;
    Ok(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        BASE64.encode(bytes)
    ))
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
