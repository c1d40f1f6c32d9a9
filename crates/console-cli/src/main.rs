//! Console CLI - command-line front end for the admin console backend.

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console_config_and_utils::{init_logging_to_file, Config, Paths};
use tracing::debug;

/// Console CLI - sign in to the admin backend and call it with a renewed session.
#[derive(Parser)]
#[command(name = "console")]
#[command(about = "Console CLI for authentication and API access")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, session and logs. Defaults to ~/.console
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Backend base URL, overriding the configuration
    #[arg(long, global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with username and password
    Login {
        /// Username (prompted when omitted)
        #[arg(short, long)]
        username: Option<String>,
        /// Password (prompted without echo when omitted)
        #[arg(long, env = "CONSOLE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Captcha ID from `console captcha`
        #[arg(long, requires = "captcha_code")]
        captcha_id: Option<String>,
        /// Captcha answer
        #[arg(long, requires = "captcha_id")]
        captcha_code: Option<String>,
    },

    /// Logout and clear the stored session
    Logout,

    /// Show the stored session
    Status {
        /// Verify the session with the server
        #[arg(long)]
        verify: bool,
    },

    /// Show the signed-in user, roles and permissions
    Whoami,

    /// Ask the server whether the access token is valid
    Validate,

    /// GET an API path with the current session
    Get {
        /// Path below the API base URL, e.g. /users
        path: String,
        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query")]
        query: Vec<String>,
    },

    /// Create a new account
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        /// Password (prompted without echo when omitted)
        #[arg(long, env = "CONSOLE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },

    /// Fetch a login captcha
    Captcha,
}

fn load_context(cli: &Cli) -> anyhow::Result<commands::Context> {
    let paths = match &cli.base_dir {
        Some(base) => Paths::with_base_dir(base.clone()),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(url) = &cli.api_url {
        config.api_base_url = url.clone();
        config.validate()?;
    }
    Ok(commands::Context {
        config,
        paths,
        format: cli.format,
    })
}

async fn run(cli: Cli, ctx: &commands::Context) -> anyhow::Result<()> {
    match cli.command {
        Commands::Login {
            username,
            password,
            captcha_id,
            captcha_code,
        } => {
            let captcha = captcha_id.zip(captcha_code);
            commands::login(ctx, username, password, captcha).await
        }
        Commands::Logout => commands::logout(ctx).await,
        Commands::Status { verify } => commands::status(ctx, verify).await,
        Commands::Whoami => commands::whoami(ctx).await,
        Commands::Validate => commands::validate(ctx).await,
        Commands::Get { path, query } => commands::get(ctx, &path, &query).await,
        Commands::Register {
            username,
            email,
            password,
            role,
        } => commands::register(ctx, username, email, password, role).await,
        Commands::Captcha => commands::captcha(ctx).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    let ctx = match load_context(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            output::print_error(&format!("{:#}", e), &format);
            std::process::exit(1);
        }
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| ctx.config.log_level.clone());
    init_logging_to_file(&level, ctx.paths.log_file());
    debug!(
        base_dir = %ctx.paths.base_dir().display(),
        api_base_url = %ctx.config.api_base_url,
        "Console CLI starting"
    );

    if let Err(e) = run(cli, &ctx).await {
        output::print_error(&format!("{:#}", e), &format);
        if let Some(hint) = commands::login_hint(&e) {
            eprintln!("{}", hint);
        }
        std::process::exit(1);
    }
}
