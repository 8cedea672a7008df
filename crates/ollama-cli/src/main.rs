//! Command-line front end for `ollama-client`.
//!
//! Every subcommand maps to one client operation. Streaming commands print
//! events as they arrive. Ctrl-C stops any command and aborts every open
//! stream.

mod observability;

use std::future::Future;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use futures::StreamExt as _;
use ollama_client::types::{
    ChatMessage, ChatRequest, CopyRequest, CreateRequest, DeleteRequest, EmbedInput, EmbedRequest,
    GenerateRequest, ProgressResponse, PullRequest, PushRequest, ResponseFormat, ShowRequest,
};
use ollama_client::{ClientConfig, EventStream, Image, OllamaClient, OllamaError};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ollama-cli", version, about = "Talk to an Ollama server")]
struct Cli {
    /// Server address; defaults to OLLAMA_HOST or http://127.0.0.1:11434.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Wait for one final response instead of streaming.
    #[arg(long, global = true)]
    no_stream: bool,

    /// Log client activity to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Complete a prompt.
    Generate {
        model: String,
        prompt: String,
        #[arg(long)]
        system: Option<String>,
        /// Image file to attach; repeatable.
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        /// Ask the model for a JSON answer.
        #[arg(long)]
        json: bool,
    },
    /// Send one user message.
    Chat {
        model: String,
        message: String,
        #[arg(long)]
        system: Option<String>,
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
    /// Embed one or more texts.
    Embed {
        model: String,
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// List local models.
    List,
    /// List models loaded in memory.
    Ps,
    /// Show model details.
    Show {
        model: String,
        #[arg(long)]
        full: bool,
    },
    /// Download a model.
    Pull {
        model: String,
        #[arg(long)]
        insecure: bool,
    },
    /// Upload a model.
    Push {
        model: String,
        #[arg(long)]
        insecure: bool,
    },
    /// Create a model from an existing one.
    Create {
        model: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        system: Option<String>,
    },
    /// Copy a model under a new name.
    Copy { source: String, destination: String },
    /// Delete a model.
    Delete { model: String },
}

fn load_env() {
    let _ = dotenvy::from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/.env"));
    let _ = dotenvy::dotenv();
}

#[tokio::main]
async fn main() -> ExitCode {
    load_env();
    let cli = Cli::parse();
    observability::init_observability(cli.verbose);

    let result = match build_client(cli.host.as_deref()) {
        Ok(client) => {
            let work = run(&client, cli.command, !cli.no_stream);
            let result = until_interrupted(&client, work, tokio::signal::ctrl_c()).await;
            client.close();
            result
        }
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_cancelled() => {
            eprintln!("\nstopped on request");
            ExitCode::from(130)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn build_client(host: Option<&str>) -> Result<OllamaClient, OllamaError> {
    let mut config = ClientConfig::from_env();
    if let Some(host) = host {
        config = config.host(host);
    }
    let client = OllamaClient::new(config)?;
    debug!(host = client.host(), "client ready");
    Ok(client)
}

/// Runs `work` until it finishes or `interrupt` fires. An interrupt aborts
/// the client's open streams and ends the command with `Cancelled`, whether
/// or not the command was streaming.
async fn until_interrupted<W, I>(
    client: &OllamaClient,
    work: W,
    interrupt: I,
) -> Result<(), OllamaError>
where
    W: Future<Output = Result<(), OllamaError>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(work);
    tokio::select! {
        result = &mut work => result,
        signal = interrupt => match signal {
            Ok(()) => {
                let cancelled = client.abort();
                info!(cancelled, "interrupt received");
                Err(OllamaError::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl-C");
                work.await
            }
        },
    }
}

async fn run(client: &OllamaClient, command: Command, stream: bool) -> Result<(), OllamaError> {
    match command {
        Command::Generate {
            model,
            prompt,
            system,
            images,
            json,
        } => {
            let mut request = GenerateRequest::new(model, prompt);
            if let Some(system) = system {
                request = request.system(system);
            }
            for path in images {
                request = request.image(Image::from_path(path)?);
            }
            if json {
                request = request.format(ResponseFormat::json());
            }
            if stream {
                let events = client.generate_stream(request).await?;
                drain(events, |event| print_fragment(&event.response)).await?;
                println!();
            } else {
                println!("{}", client.generate(request).await?.response);
            }
        }
        Command::Chat {
            model,
            message,
            system,
            images,
        } => {
            let mut user = ChatMessage::user(message);
            for path in images {
                user = user.image(Image::from_path(path)?);
            }
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(user);
            let request = ChatRequest::new(model, messages);
            if stream {
                let events = client.chat_stream(request).await?;
                drain(events, |event| print_fragment(&event.message.content)).await?;
                println!();
            } else {
                println!("{}", client.chat(request).await?.message.content);
            }
        }
        Command::Embed { model, inputs } => {
            let input = match <[String; 1]>::try_from(inputs) {
                Ok([single]) => EmbedInput::Single(single),
                Err(batch) => EmbedInput::Batch(batch),
            };
            let response = client.embed(EmbedRequest::new(model, input)).await?;
            for vector in response.vectors() {
                println!("{}", to_json(&vector)?);
            }
        }
        Command::List => {
            for model in client.list().await?.models {
                println!("{:<40} {:>12} {}", model.name, model.size, model.modified_at);
            }
        }
        Command::Ps => {
            for model in client.ps().await?.models {
                println!("{:<40} {:>12} {}", model.name, model.size_vram, model.expires_at);
            }
        }
        Command::Show { model, full } => {
            let response = client.show(ShowRequest::new(model).verbose(full)).await?;
            println!("{}", to_json(&response)?);
        }
        Command::Pull { model, insecure } => {
            let request = PullRequest::new(model).insecure(insecure);
            if stream {
                drain(client.pull_stream(request).await?, print_progress).await?;
            } else {
                print_progress(&client.pull(request).await?);
            }
        }
        Command::Push { model, insecure } => {
            let request = PushRequest::new(model).insecure(insecure);
            if stream {
                drain(client.push_stream(request).await?, print_progress).await?;
            } else {
                print_progress(&client.push(request).await?);
            }
        }
        Command::Create {
            model,
            from,
            system,
        } => {
            let mut request = CreateRequest::new(model).from_model(from);
            if let Some(system) = system {
                request = request.system(system);
            }
            if stream {
                drain(client.create_stream(request).await?, print_progress).await?;
            } else {
                print_progress(&client.create(request).await?);
            }
        }
        Command::Copy {
            source,
            destination,
        } => {
            let status = client.copy(CopyRequest::new(source, destination)).await?;
            println!("{}", status.status);
        }
        Command::Delete { model } => {
            let status = client.delete(DeleteRequest::new(model)).await?;
            println!("{}", status.status);
        }
    }
    Ok(())
}

async fn drain<T>(
    mut events: EventStream<T>,
    mut on_event: impl FnMut(&T),
) -> Result<(), OllamaError> {
    while let Some(event) = events.next().await {
        on_event(&event?);
    }
    Ok(())
}

fn print_fragment(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn print_progress(event: &ProgressResponse) {
    match event.fraction() {
        Some(fraction) => println!("{} {:>5.1}%", event.status, fraction * 100.0),
        None => println!("{}", event.status),
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, OllamaError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| OllamaError::Protocol(format!("failed to render output: {e}")))
}
