use std::path::PathBuf;

use chrono::Utc;
use structopt::StructOpt;

use terramail::accounts::{NewUser, UserUpdate};
use terramail::config::Config;
use terramail::input::read_input;
use terramail::models::{Role, User};
use terramail::output::{OutputFormat, OutputHandler};
use terramail::processing::StopSignal;
use terramail::TerraMail;

/// TerraMail batch verification CLI
#[derive(StructOpt, Debug)]
#[structopt(name = "terramail", about = "Batch email verification with guarded logins")]
struct Cli {
    /// Path to configuration file
    #[structopt(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Log in and print a session token
    Login {
        #[structopt(long)]
        email: String,
        #[structopt(long)]
        password: String,
        /// Client IP the attempt is made from
        #[structopt(long, default_value = "127.0.0.1")]
        ip: String,
    },
    /// Revoke a session token
    Logout {
        #[structopt(long)]
        token: String,
    },
    /// Show the account behind a session token
    Whoami {
        #[structopt(long)]
        token: String,
    },
    /// Classify items, one per line, from a file or stdin
    Process {
        #[structopt(long)]
        token: String,
        /// Input file (stdin when omitted)
        #[structopt(short, long)]
        file: Option<PathBuf>,
    },
    /// Zero the caller's processing counters
    Reset {
        #[structopt(long)]
        token: String,
    },
    /// Manage user accounts (admin)
    Users {
        #[structopt(long)]
        token: String,
        #[structopt(subcommand)]
        action: UsersAction,
    },
    /// Manage IP bans (admin)
    Bans {
        #[structopt(long)]
        token: String,
        #[structopt(subcommand)]
        action: BansAction,
    },
    /// Show recent login attempts (admin)
    Attempts {
        #[structopt(long)]
        token: String,
        #[structopt(short, long, default_value = "50")]
        limit: usize,
    },
}

#[derive(StructOpt, Debug)]
enum UsersAction {
    List,
    Create {
        #[structopt(long)]
        email: String,
        #[structopt(long)]
        password: Option<String>,
        #[structopt(long, default_value = "user")]
        role: Role,
        #[structopt(long, default_value = "30")]
        days: u32,
        /// Allowed client IP (repeatable)
        #[structopt(long = "allowed-ip")]
        allowed_ips: Vec<String>,
    },
    Update {
        #[structopt(long)]
        id: String,
        #[structopt(long)]
        role: Option<Role>,
        #[structopt(long)]
        days: Option<u32>,
        /// Replace the allowed IP list (repeatable)
        #[structopt(long = "allowed-ip")]
        allowed_ips: Vec<String>,
        /// Remove all IP restrictions
        #[structopt(long)]
        clear_ips: bool,
        #[structopt(long)]
        password: Option<String>,
    },
    Delete {
        #[structopt(long)]
        id: String,
    },
    Ban {
        #[structopt(long)]
        id: String,
    },
    Unban {
        #[structopt(long)]
        id: String,
    },
    /// Add subscription days (negative values remove days)
    Extend {
        #[structopt(long)]
        id: String,
        #[structopt(long, allow_hyphen_values = true)]
        days: i64,
    },
}

#[derive(StructOpt, Debug)]
enum BansAction {
    List,
    Add {
        #[structopt(long)]
        ip: String,
        #[structopt(long, default_value = "Manual ban")]
        reason: String,
        /// Ban duration; permanent when omitted
        #[structopt(long)]
        hours: Option<i64>,
    },
    Remove {
        #[structopt(long)]
        id: String,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::from_args();

    if let Command::Config { output } = &cli.command {
        Config::default().to_file(output)?;
        println!("Default configuration written to: {:?}", output);
        return Ok(());
    }

    let mut config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        log::debug!("Config file {:?} not found, using defaults", cli.config);
        Config::default()
    };
    config.apply_env_overrides();
    if config.auth.session_secret == Config::default().auth.session_secret {
        log::warn!("Using the default session secret; set TERRAMAIL_SESSION_SECRET");
    }

    let app = TerraMail::open(&config)?;
    if let Some(admin) = app.bootstrap(&config)? {
        println!("Created bootstrap admin {}", admin.email);
    }

    match cli.command {
        Command::Config { .. } => Ok(()),
        Command::Login { email, password, ip } => {
            let login = app.auth().login(&email, &password, &ip)?;
            println!("Logged in as {} ({})", login.user.email, login.user.role);
            println!("{}", login.token);
            Ok(())
        }
        Command::Logout { token } => {
            if app.auth().logout(&token)? {
                println!("Logged out");
            } else {
                println!("No active session for that token");
            }
            Ok(())
        }
        Command::Whoami { token } => match app.auth().current_user(&token)? {
            Some(user) => {
                print_user(&user);
                Ok(())
            }
            None => Err("Not logged in".into()),
        },
        Command::Process { token, file } => run_process(&app, &config, &token, file).await,
        Command::Reset { token } => {
            let user = app.auth().current_user(&token)?.ok_or("Not logged in")?;
            app.reset_session(&user.id)?;
            println!("Counters reset");
            Ok(())
        }
        Command::Users { token, action } => {
            app.auth().require_admin(&token)?;
            run_users(&app, action)
        }
        Command::Bans { token, action } => {
            app.auth().require_admin(&token)?;
            run_bans(&app, action)
        }
        Command::Attempts { token, limit } => {
            app.auth().require_admin(&token)?;
            for attempt in app.store().recent_login_attempts(limit)? {
                println!(
                    "{}  {:<15}  {:<30}  {}",
                    attempt.created_at.format("%Y-%m-%d %H:%M:%S"),
                    attempt.ip_address,
                    attempt.user_email.as_deref().unwrap_or("-"),
                    if attempt.success { "success" } else { "failed" }
                );
            }
            Ok(())
        }
    }
}

async fn run_process(
    app: &TerraMail,
    config: &Config,
    token: &str,
    file: Option<PathBuf>,
) -> CliResult {
    let user = app.auth().current_user(token)?.ok_or("Not logged in")?;
    let raw = read_input(file.as_deref())?;

    let stop = StopSignal::new();
    let s = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("Received stop signal, finishing current item...");
        s.stop();
    })?;

    let mut output = OutputHandler::new(
        OutputFormat::from_str(&config.output.format),
        config.output.file_path.clone(),
    )?;

    let report = app
        .processor()
        .run(&user.id, &raw, &stop, |_, result| {
            if let Err(e) = output.write_result(result) {
                log::error!("Failed to write result: {}", e);
            }
        })
        .await?;

    output.write_summary(&report)?;
    output.flush()?;
    Ok(())
}

fn run_users(app: &TerraMail, action: UsersAction) -> CliResult {
    let accounts = app.accounts();
    match action {
        UsersAction::List => {
            for user in accounts.list_users()? {
                print_user(&user);
            }
        }
        UsersAction::Create {
            email,
            password,
            role,
            days,
            allowed_ips,
        } => {
            let user = accounts.create_user(NewUser {
                email,
                password,
                role,
                subscription_days: days,
                allowed_ips,
            })?;
            print_user(&user);
        }
        UsersAction::Update {
            id,
            role,
            days,
            allowed_ips,
            clear_ips,
            password,
        } => {
            let allowed_ips = if clear_ips {
                Some(Vec::new())
            } else if allowed_ips.is_empty() {
                None
            } else {
                Some(allowed_ips)
            };
            let user = accounts.update_user(
                &id,
                UserUpdate {
                    role,
                    subscription_days: days,
                    allowed_ips,
                    is_banned: None,
                },
            )?;
            if let Some(password) = password {
                accounts.set_password(&id, &password)?;
            }
            print_user(&user);
        }
        UsersAction::Delete { id } => {
            accounts.delete_user(&id)?;
            println!("Deleted user {}", id);
        }
        UsersAction::Ban { id } => print_user(&accounts.ban_user(&id)?),
        UsersAction::Unban { id } => print_user(&accounts.unban_user(&id)?),
        UsersAction::Extend { id, days } => print_user(&accounts.extend_subscription(&id, days)?),
    }
    Ok(())
}

fn run_bans(app: &TerraMail, action: BansAction) -> CliResult {
    let guard = app.guard();
    let now = Utc::now();
    match action {
        BansAction::List => {
            for ban in guard.list_bans()? {
                let until = match ban.banned_until {
                    Some(until) => until.format("%Y-%m-%d %H:%M:%S").to_string(),
                    None => "permanent".to_string(),
                };
                let state = if ban.is_active_at(now) { "active" } else { "expired" };
                println!(
                    "{}  {:<15}  {:<20}  {:<8}  {}",
                    ban.id, ban.ip_address, until, state, ban.reason
                );
            }
        }
        BansAction::Add { ip, reason, hours } => {
            let ban = guard.ban(&ip, &reason, hours, now)?;
            println!("Banned {} ({})", ban.ip_address, ban.id);
        }
        BansAction::Remove { id } => {
            guard.unban(&id)?;
            println!("Ban {} removed", id);
        }
    }
    Ok(())
}

fn print_user(user: &User) {
    let ips = if user.allowed_ips.is_empty() {
        "any".to_string()
    } else {
        user.allowed_ips.join(",")
    };
    println!(
        "{}  {:<30}  {:<5}  {:>4}d  ips={}{}",
        user.id,
        user.email,
        user.role.as_str(),
        user.subscription_days,
        ips,
        if user.is_banned { "  [banned]" } else { "" }
    );
}

