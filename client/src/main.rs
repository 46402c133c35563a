//! GetMyMusic - command line client

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use getmymusic::output::format_listing;
use getmymusic::prompt::read_password;
use getmymusic::RemoteSession;
use protocol::DEFAULT_PORT;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "getmymusic")]
#[command(version)]
#[command(about = "Store and fetch music files on a GetMyMusic server", long_about = None)]
struct Args {
    /// Server host name or address
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Account name
    #[arg(short, long)]
    user: String,

    /// Account password (prompted for when omitted)
    #[arg(long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the account
    Signup,

    /// List stored files with their checksums
    List,

    /// Upload a local file
    Upload {
        path: PathBuf,

        /// Name to store the file under (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Download a stored file
    Download {
        name: String,

        /// Where to write the file (defaults to the stored name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so listings stay clean on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => prompt_password().await?,
    };

    let mut session = RemoteSession::connect(&args.host, args.port).await?;

    match args.command {
        Command::Signup => {
            session.signup(&args.user, &password).await?;
            println!("Account {} created", args.user);
        }
        Command::List => {
            session.logon(&args.user, &password).await?;
            let entries = session.list().await?;
            print!("{}", format_listing(&entries));
        }
        Command::Upload { path, name } => {
            session.logon(&args.user, &password).await?;
            let stored = session.upload_file(&path, name.as_deref()).await?;
            println!("Uploaded {:?} as {}", path, stored);
        }
        Command::Download { name, output } => {
            session.logon(&args.user, &password).await?;
            let data = session.download(&name).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(&name));
            tokio::fs::write(&output, &data)
                .await
                .with_context(|| format!("Failed to write {:?}", output))?;
            println!("Downloaded {} ({} bytes) to {:?}", name, data.len(), output);
        }
    }

    session.leave().await?;
    info!("Session closed");
    Ok(())
}

async fn prompt_password() -> Result<String> {
    tokio::task::spawn_blocking(|| read_password("Password: "))
        .await
        .context("Password prompt failed")?
}
