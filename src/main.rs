//! `tn` - post terminal notifications through the session process.
//!
//! This is the main binary entry point. See the `termnotify` library for
//! the core functionality.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use termnotify::payload::{DEFAULT_TITLE, NotificationPayload};
use termnotify::session::attachment::HttpFetcher;
use termnotify::session::sink::InMemorySink;
use termnotify::socket::messages::ALL_GROUPS;
use termnotify::socket::server::SessionServer;
use termnotify::{
    Config, Engine, EngineError, InterruptionLevel, Response, SessionManager, Status,
};

/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "tn")]
#[command(version)]
#[command(about = "Post terminal notifications through a session process")]
struct Cli {
    /// Session socket path (overrides config and TN_SHIM_SOCKET)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Post a notification
    Send(SendArgs),
    /// List delivered notifications as a tab-separated table
    List {
        /// Group identifier, or ALL
        #[arg(default_value = ALL_GROUPS)]
        group: String,
    },
    /// Remove delivered notifications
    Remove {
        /// Group identifier, or ALL
        group: String,
    },
    /// Run the session process in the foreground
    Serve,
}

#[derive(clap::Args)]
struct SendArgs {
    /// Title line
    #[arg(long, default_value = DEFAULT_TITLE)]
    title: String,
    /// Second line
    #[arg(long)]
    subtitle: Option<String>,
    /// Body text (read from stdin when omitted and stdin is not a terminal)
    #[arg(long)]
    message: Option<String>,
    /// Sound name, or "default"
    #[arg(long)]
    sound: Option<String>,
    /// Group tag; replaces any delivered notification in the same group
    #[arg(long)]
    group: Option<String>,
    /// URL opened on click
    #[arg(long)]
    open: Option<String>,
    /// Shell command run on click
    #[arg(long)]
    execute: Option<String>,
    /// Bundle identifier activated on click
    #[arg(long)]
    activate: Option<String>,
    /// Image attachment: path, file:// URL or http(s) URL
    #[arg(long)]
    content_image: Option<String>,
    /// Sender profile
    #[arg(long)]
    sender: Option<String>,
    /// passive, active or timeSensitive
    #[arg(long, default_value = "active")]
    interruption_level: InterruptionLevel,
    /// Seconds to wait for a click result
    #[arg(long, allow_negative_numbers = true)]
    wait: Option<i64>,
}

impl SendArgs {
    fn into_payload(self) -> Result<NotificationPayload> {
        let message = match self.message {
            Some(message) => message,
            None => read_stdin_message()?,
        };

        let mut payload = NotificationPayload::new(message).with_title(self.title);
        payload.subtitle = self.subtitle;
        payload.group_id = self.group;
        payload.sound = self.sound;
        payload.open_url = self.open;
        payload.execute = self.execute;
        payload.activate_bundle_id = self.activate;
        payload.content_image = self.content_image.map(absolute_image_ref).transpose()?;
        payload.sender_profile = self.sender;
        payload.interruption_level = self.interruption_level;
        payload.wait_seconds = self.wait;
        Ok(payload)
    }
}

/// Make a bare local image path absolute so the session process, which
/// runs in another working directory, finds the same file. URLs pass
/// through unchanged.
fn absolute_image_ref(reference: String) -> Result<String> {
    let is_url = ["http://", "https://", "file://"]
        .iter()
        .any(|scheme| reference.starts_with(scheme));
    if is_url || reference.is_empty() {
        return Ok(reference);
    }
    let path = match std::fs::canonicalize(&reference) {
        Ok(path) => path,
        Err(_) => std::env::current_dir()
            .context("Failed to read current directory")?
            .join(&reference),
    };
    Ok(path.display().to_string())
}

/// Message text piped on stdin, or empty when stdin is a terminal.
fn read_stdin_message() -> Result<String> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(String::new());
    }
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read message from stdin")?;
    Ok(input.trim_end_matches(['\n', '\r']).to_string())
}

/// Exit code for a response status.
fn exit_code(status: Status) -> u8 {
    match status {
        Status::Ok => 0,
        Status::RuntimeError => 1,
        Status::ValidationError => 2,
        Status::NotAuthorized => 3,
        Status::InvalidAttachment => 4,
    }
}

fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Ok(path) = std::env::var("TN_LOG_FILE") {
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("tn: cannot open log file {path}: {e}"),
        }
    }
    builder.init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("tn: {e:#}");
            let code = match e.downcast_ref::<EngineError>() {
                Some(EngineError::Validation(_)) => exit_code(Status::ValidationError),
                _ => 1,
            };
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let mut config = Config::load()?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    let engine = Engine::remote(config.socket_path.clone())
        .max_attachment_bytes(config.max_attachment_bytes);
    let response = match cli.command {
        Commands::Send(args) => {
            let payload = args.into_payload()?;
            runtime.block_on(engine.post(payload))?
        }
        Commands::List { group } => runtime.block_on(engine.list(&group))?,
        Commands::Remove { group } => runtime.block_on(engine.remove(&group))?,
        Commands::Serve => {
            runtime.block_on(serve(&config))?;
            return Ok(0);
        }
    };
    Ok(report(&response))
}

/// Print the response and pick the exit code.
fn report(response: &Response) -> u8 {
    log::debug!(
        "[Client] response {:?}: {}",
        response.correlation_id,
        response.status
    );
    match (&response.status, &response.message) {
        (Status::Ok, Some(body)) => println!("{body}"),
        (Status::Ok, None) => {}
        (status, Some(message)) => eprintln!("tn: {status}: {message}"),
        (status, None) => eprintln!("tn: {status}"),
    }
    exit_code(response.status)
}

/// Run the session process until Ctrl-C.
async fn serve(config: &Config) -> Result<()> {
    let fetcher = HttpFetcher::new(config.fetch_timeout(), config.max_attachment_bytes);
    let session = SessionManager::with_fetcher(InMemorySink::new(), fetcher)
        .max_attachment_bytes(config.max_attachment_bytes)
        .delivery_delay(config.delivery_delay());

    let server = SessionServer::start(config.socket_path.clone(), session).with_context(|| {
        format!(
            "Failed to start session server at {}",
            config.socket_path.display()
        )
    })?;

    let _cleanup = scopeguard::guard(server.socket_path().to_path_buf(), |path| {
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("[Server] could not remove {}: {e}", path.display());
        }
    });

    println!("tn: serving on {}", server.socket_path().display());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    server.shutdown();
    Ok(())
}
