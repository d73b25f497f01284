// ABOUTME: Entry point for the escape CLI
// ABOUTME: Parses subcommands and dispatches to the command implementations

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "escape", about = "Talk to your ship over its airlock channel")]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to a ship and save the session
    Login {
        /// Ship URL (e.g., https://sampel-palnet.arvo.network or http://localhost:8080)
        url: String,

        /// Access code (prompted for when omitted)
        #[arg(long, env = "ESCAPE_ACCESS_CODE")]
        password: Option<String>,

        /// Default desk for threads
        #[arg(long)]
        desk: Option<String>,
    },

    /// Poke an app
    Poke {
        app: String,
        mark: String,
        /// JSON payload
        json: String,

        /// Target ship (defaults to your own)
        #[arg(long)]
        ship: Option<String>,
    },

    /// Read from an app's scry namespace
    Scry { app: String, path: String },

    /// Print facts from a subscription
    Subscribe {
        app: String,
        path: String,

        /// Exit after the first fact
        #[arg(long)]
        once: bool,

        /// With --once, give up after this many seconds (0 waits forever)
        #[arg(long, default_value_t = 20)]
        timeout_secs: u64,
    },

    /// Run a thread
    Thread {
        input_mark: String,
        output_mark: String,
        thread: String,
        /// JSON body
        json: String,

        /// Desk the thread lives on
        #[arg(long)]
        desk: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A live subscription streams facts to stdout, so its logs go to a file
    let streaming = matches!(cli.command, Commands::Subscribe { once: false, .. });
    if streaming {
        escape_log::init_file("escape");
    } else if cli.verbose {
        escape_log::init_with_level(tracing::Level::DEBUG);
    } else {
        escape_log::init();
    }

    match cli.command {
        Commands::Login {
            url,
            password,
            desk,
        } => escape_cli::login(url, password, desk).await,
        Commands::Poke {
            app,
            mark,
            json,
            ship,
        } => escape_cli::poke(app, mark, json, ship).await,
        Commands::Scry { app, path } => escape_cli::scry(app, path).await,
        Commands::Subscribe {
            app,
            path,
            once,
            timeout_secs,
        } => escape_cli::subscribe(app, path, once, timeout_secs).await,
        Commands::Thread {
            input_mark,
            output_mark,
            thread,
            json,
            desk,
        } => escape_cli::thread(input_mark, output_mark, thread, json, desk).await,
    }
}
