use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wolfconf_meet::api::ApiClient;
use wolfconf_meet::auth::{Credentials, Registration};
use wolfconf_meet::config::{ClientConfig, DEFAULT_API_BASE};
use wolfconf_meet::loopback::{LoopbackDevices, LoopbackPeerFactory};
use wolfconf_meet::prejoin::{Background, Language, PreJoin};
use wolfconf_meet::room::{MeetingRoom, RoomCommand, RoomContext, SidePanel};
use wolfconf_meet::schedule::Schedule;
use wolfconf_meet::signaling;

#[derive(Parser)]
#[command(name = "wolfconf-meet", version, about = "Headless WolfConf meeting client")]
struct Cli {
    /// Backend base URL.
    #[arg(long, env = "WOLFCONF_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Access token from `login`.
    #[arg(long, env = "WOLFCONF_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "WOLFCONF_ROSTER_POLL_MS", default_value_t = 1500)]
    roster_poll_ms: u64,

    #[arg(long, env = "WOLFCONF_CHAT_POLL_MS", default_value_t = 2000)]
    chat_poll_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account.
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log in and print the access token.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    Whoami,
    /// Create a meeting and print its id.
    Create { title: String },
    End { session_id: String },
    /// List who is in a meeting.
    Roster { session_id: String },
    #[command(subcommand)]
    Chat(ChatCommand),
    /// Print the local meeting schedule, sample meetings included.
    Schedule {
        /// Extra meeting as TITLE DATE TIME, e.g. "Retro" 2025-10-06 15:30.
        #[arg(long, num_args = 3, value_names = ["TITLE", "DATE", "TIME"])]
        add: Vec<String>,
    },
    /// Open the signaling socket and print every message that arrives.
    Watch { session_id: String },
    /// Join a meeting; reads commands and chat lines from stdin until Ctrl-C.
    Join {
        session_id: String,
        #[arg(long)]
        name: Option<String>,
        /// Use synthetic devices and a peer connection that talks to nobody.
        #[arg(long)]
        loopback: bool,
        #[arg(long, default_value = "none")]
        background: String,
        #[arg(long, default_value = "en")]
        language: String,
        /// Directory for finished recordings.
        #[arg(long)]
        recordings_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ChatCommand {
    List { session_id: String },
    Send { session_id: String, message: String },
}

impl Cli {
    fn config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::new(&self.api_base)?;
        config.roster_poll = Duration::from_millis(self.roster_poll_ms);
        config.chat_poll = Duration::from_millis(self.chat_poll_ms);
        Ok(config)
    }

    fn token(&self) -> anyhow::Result<String> {
        self.token
            .clone()
            .context("not logged in: pass --token or set WOLFCONF_TOKEN")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api = ApiClient::new(cli.config()?)?;

    match &cli.command {
        Command::Register {
            full_name,
            email,
            password,
        } => {
            let registration = Registration {
                full_name: full_name.clone(),
                email: email.clone(),
                password: password.clone(),
            };
            api.register(&registration).await.context("registration failed")?;
            println!("Account created for {email}. You can log in now.");
        }
        Command::Login { username, password } => {
            let credentials = Credentials {
                username: username.clone(),
                password: password.clone(),
            };
            let tokens = api.login(&credentials).await.context("login failed")?;
            println!("{}", tokens.access_token);
        }
        Command::Whoami => {
            let me = api.current_user(&cli.token()?).await?;
            println!("{} ({})", me.full_name, me.id);
        }
        Command::Create { title } => {
            let session = api.create_session(&cli.token()?, title).await?;
            println!("{}", session.id);
        }
        Command::End { session_id } => {
            api.end_session(&cli.token()?, session_id).await?;
            println!("Meeting {session_id} ended.");
        }
        Command::Roster { session_id } => {
            for p in api.participants(&cli.token()?, session_id).await? {
                let role = p.role.map(|r| format!(" [{r}]")).unwrap_or_default();
                println!("{}  {}{}", p.user_id, p.display_name, role);
            }
        }
        Command::Chat(ChatCommand::List { session_id }) => {
            for message in api.chat_history(&cli.token()?, session_id).await? {
                println!("{}", message.line());
            }
        }
        Command::Chat(ChatCommand::Send { session_id, message }) => {
            let saved = api.send_chat(&cli.token()?, session_id, message).await?;
            println!("{}", saved.line());
        }
        Command::Schedule { add } => {
            let mut schedule = Schedule::with_samples()?;
            for entry in add.chunks(3) {
                if let [title, date, time] = entry {
                    schedule.add(title, date, time)?;
                }
            }
            for meeting in schedule.meetings() {
                println!(
                    "{}  {}  {}",
                    meeting.date,
                    meeting.time.format("%H:%M"),
                    meeting.title
                );
            }
        }
        Command::Watch { session_id } => watch(&api, session_id, &cli.token()?).await?,
        Command::Join {
            session_id,
            name,
            loopback,
            background,
            language,
            recordings_dir,
        } => {
            if !loopback {
                bail!("no media engine is built in; pass --loopback");
            }
            let token = cli.token()?;
            let name = match name {
                Some(name) => name.clone(),
                None => api.current_user(&token).await?.full_name,
            };
            let mut prejoin = PreJoin::open(session_id.clone(), Arc::new(LoopbackDevices::default())).await?;
            prejoin.set_display_name(&name, false);
            prejoin.set_background(background.parse::<Background>()?);
            prejoin.set_language(language.parse::<Language>()?);
            let settings = prejoin.join()?;

            let context = RoomContext {
                api,
                token,
                peers: Arc::new(LoopbackPeerFactory::default()),
                recordings_dir: recordings_dir.clone(),
            };
            let room = MeetingRoom::join(settings, context)
                .await
                .with_context(|| format!("could not join meeting {session_id}"))?;
            run_room(room).await;
        }
    }
    Ok(())
}

async fn watch(api: &ApiClient, session_id: &str, token: &str) -> anyhow::Result<()> {
    let (handle, mut inbox) = signaling::connect(api.config(), session_id, token).await?;
    loop {
        tokio::select! {
            msg = inbox.recv() => match msg {
                Some(msg) => println!("{}", serde_json::to_string(&msg)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.close().await;
    Ok(())
}

async fn run_room(room: MeetingRoom) {
    info!(
        session = room.session_id(),
        name = room.display_name(),
        "in meeting; type a message, or /cam /mic /share /unshare /rec /stoprec /chat /people /leave"
    );
    let (commands, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(room.run(rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Some(command) = parse_line(&line) else { continue };
                let leaving = matches!(command, RoomCommand::Leave);
                if commands.send(command).is_err() || leaving {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = commands.send(RoomCommand::Leave);
                break;
            }
        }
    }
    drop(commands);
    if let Err(err) = task.await {
        tracing::warn!(%err, "meeting task ended abnormally");
    }
}

fn parse_line(line: &str) -> Option<RoomCommand> {
    let line = line.trim();
    let command = match line {
        "" => return None,
        "/cam" => RoomCommand::ToggleCamera,
        "/mic" => RoomCommand::ToggleMic,
        "/share" => RoomCommand::StartScreenShare,
        "/unshare" => RoomCommand::StopScreenShare,
        "/rec" => RoomCommand::StartRecording,
        "/stoprec" => RoomCommand::StopRecording,
        "/chat" => RoomCommand::TogglePanel(SidePanel::Chat),
        "/people" => RoomCommand::TogglePanel(SidePanel::Participants),
        "/captions" => RoomCommand::ToggleCaptions,
        "/leave" => RoomCommand::Leave,
        text => RoomCommand::SendChat(text.to_string()),
    };
    Some(command)
}
