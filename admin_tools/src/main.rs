//! Realmgate - Admin Tools CLI
//!
//! Remote administration tool for the realmgate server.
//! Talks to the server's admin API to inspect sessions and manage accounts and bans.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

mod client;

use client::{AdminClient, SessionSummary};

#[derive(Parser)]
#[command(name = "admin_tools")]
#[command(author = "Thomas Lekanger")]
#[command(version = "1.0.0")]
#[command(about = "CLI administration tools for the realmgate server", long_about = None)]
struct Cli {
    /// Admin API URL (e.g., http://localhost:8080)
    #[arg(short, long, env = "REALMGATE_ADMIN_URL", default_value = "http://localhost:8080")]
    server: String,

    /// API key for authentication
    #[arg(short = 'k', long, env = "REALMGATE_ADMIN_KEY")]
    api_key: Option<String>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Server management commands
    Server {
        #[command(subcommand)]
        action: ServerCommands,
    },
    /// Live session commands
    Session {
        #[command(subcommand)]
        action: SessionCommands,
    },
    /// Account management commands
    Account {
        #[command(subcommand)]
        action: AccountCommands,
    },
    /// Address ban commands
    Ban {
        #[command(subcommand)]
        action: BanCommands,
    },
    /// Interactive mode
    Interactive,
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Show server statistics
    Stats,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List live sessions
    List {
        /// Only one listener: logon or world
        #[arg(short, long)]
        protocol: Option<String>,
        /// Only sessions of this account
        #[arg(short, long)]
        account: Option<String>,
    },
    /// Disconnect one session by id
    Kick {
        /// Session id
        id: String,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// List accounts
    List {
        /// Search filter
        #[arg(short, long)]
        search: Option<String>,
        /// Limit results
        #[arg(short, long, default_value = "50")]
        limit: i64,
        /// Skip this many results
        #[arg(short, long, default_value = "0")]
        offset: i64,
    },
    /// Get account info
    Info {
        /// Account username
        username: String,
    },
    /// Register a new account
    Create {
        username: String,
        password: String,
        /// Security level: player, moderator, gamemaster, administrator, console
        #[arg(short, long)]
        security: Option<String>,
    },
    /// Replace an account's password
    Password { username: String, password: String },
    /// Ban an account and disconnect its sessions
    Ban {
        username: String,
        /// Reason for ban
        #[arg(short, long)]
        reason: String,
        /// Duration in hours (omit for permanent)
        #[arg(short, long)]
        duration: Option<u32>,
    },
    /// Lift an account's bans
    Unban { username: String },
    /// Lock an account (use --unlock to clear)
    Lock {
        username: String,
        #[arg(long)]
        unlock: bool,
    },
    /// Set an account's security level
    Security { username: String, level: String },
    /// Set the authenticator secret as hex (omit to clear)
    Totp {
        username: String,
        secret: Option<String>,
    },
    /// Disconnect every session of an account
    Kick { username: String },
}

#[derive(Subcommand)]
enum BanCommands {
    /// List bans in force
    List,
    /// Ban an address
    Create {
        /// IPv4 or IPv6 address
        ip: String,
        /// Reason for ban
        #[arg(short, long)]
        reason: String,
        /// Duration in hours (omit for permanent)
        #[arg(short, long)]
        duration: Option<u32>,
    },
    /// Lift the bans on an address
    Remove { ip: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let api_key = cli.api_key.unwrap_or_else(|| {
        eprintln!(
            "{}",
            "Warning: No API key provided. Use --api-key or REALMGATE_ADMIN_KEY env var.".yellow()
        );
        String::new()
    });

    let client = AdminClient::new(&cli.server, &api_key);
    let json_output = cli.format == "json";

    match cli.command {
        Some(Commands::Server { action }) => match action {
            ServerCommands::Stats => {
                let stats = client.get_stats().await?;
                if json_output {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                } else {
                    println!("{}", "Server Statistics".bold().underline());
                    println!("  Version:           {}", stats.version);
                    println!("  Uptime:            {}", format_duration(stats.uptime_secs));
                    println!("  Connections:       {}", stats.total_connections.to_string().green());
                    println!("  Logon (authed):    {}", stats.logon_authenticated);
                    println!("  World (authed):    {}", stats.world_authenticated);
                    println!("  Accounts:          {}", stats.accounts);
                    println!("  Active Bans:       {}", stats.active_bans);
                }
            }
        },
        Some(Commands::Session { action }) => {
            handle_session_command(&client, action, json_output).await?
        }
        Some(Commands::Account { action }) => {
            handle_account_command(&client, action, json_output).await?
        }
        Some(Commands::Ban { action }) => handle_ban_command(&client, action, json_output).await?,
        Some(Commands::Interactive) => {
            run_interactive_mode(&client).await?;
        }
        None => {
            println!("Use --help for usage information, or 'interactive' for interactive mode.");
        }
    }

    Ok(())
}

fn hours_to_secs(hours: Option<u32>) -> Option<i64> {
    hours.map(|h| i64::from(h) * 3600)
}

fn format_duration(secs: i64) -> String {
    let (days, rem) = (secs / 86_400, secs % 86_400);
    format!("{}d {:02}h {:02}m {:02}s", days, rem / 3600, rem % 3600 / 60, rem % 60)
}

fn print_session(s: &SessionSummary) {
    let account = s.account.as_deref().unwrap_or("-");
    let latency = s
        .latency_ms
        .map(|ms| format!(" {}ms", ms))
        .unwrap_or_default();
    println!(
        "  {} {:<5} {:<21} {:<16} {}{}",
        s.id.dimmed(),
        s.protocol,
        s.peer,
        account.bold(),
        s.state,
        latency
    );
}

async fn handle_session_command(
    client: &AdminClient,
    action: SessionCommands,
    json: bool,
) -> Result<()> {
    match action {
        SessionCommands::List { protocol, account } => {
            let sessions = client
                .list_sessions(protocol.as_deref(), account.as_deref())
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("{}", "No live sessions.".yellow());
            } else {
                println!("{} session(s):\n", sessions.len().to_string().green());
                for s in &sessions {
                    print_session(s);
                }
            }
        }
        SessionCommands::Kick { id } => {
            let result = client.kick_session(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.kicked {
                println!("{} Session {} has been kicked.", "Success!".green(), id.bold());
            } else {
                println!("{} Session {} is already gone.", "Note:".yellow(), id);
            }
        }
    }
    Ok(())
}

async fn handle_account_command(
    client: &AdminClient,
    action: AccountCommands,
    json: bool,
) -> Result<()> {
    match action {
        AccountCommands::List {
            search,
            limit,
            offset,
        } => {
            let accounts = client.list_accounts(search.as_deref(), limit, offset).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&accounts)?);
            } else if accounts.is_empty() {
                println!("{}", "No accounts found.".yellow());
            } else {
                println!("{} account(s):\n", accounts.len());
                for a in accounts {
                    let locked = if a.locked {
                        " [LOCKED]".red().to_string()
                    } else {
                        String::new()
                    };
                    println!(
                        "  [{}] {} - {}{}",
                        a.id,
                        a.username.bold(),
                        a.security,
                        locked
                    );
                }
            }
        }
        AccountCommands::Info { username } => {
            let account = client.get_account(&username).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&account)?);
            } else {
                let summary = &account.summary;
                println!(
                    "{}",
                    format!("Account: {}", summary.username).bold().underline()
                );
                println!("  ID:            {}", summary.id);
                println!("  Security:      {}", summary.security);
                println!(
                    "  Locked:        {}",
                    if summary.locked { "Yes".red() } else { "No".green() }
                );
                println!("  Failed Logins: {}", summary.failed_logins);
                println!("  Expansion:     {}", account.expansion);
                println!("  Authenticator: {}", account.has_authenticator);
                println!("  Session Key:   {}", account.has_session_key);
                println!("  Last IP:       {}", account.last_ip.as_deref().unwrap_or("-"));
                println!("  Last OS:       {}", account.os.as_deref().unwrap_or("-"));
                println!("  Created:       {}", summary.created_at);
                println!("  Last Login:    {:?}", summary.last_login);
                match &account.active_ban {
                    Some(ban) => {
                        let until = ban
                            .expires_at
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "permanent".to_string());
                        println!("  Banned:        {} ({}, until {})", "Yes".red(), ban.reason, until);
                    }
                    None => println!("  Banned:        {}", "No".green()),
                }
                if !account.sessions.is_empty() {
                    println!("\n  Sessions:");
                    for s in &account.sessions {
                        print_session(s);
                    }
                }
            }
        }
        AccountCommands::Create {
            username,
            password,
            security,
        } => {
            let result = client
                .create_account(&username, &password, security.as_deref())
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "{} Account {} created with ID {}.",
                    "Success!".green(),
                    result.username.bold(),
                    result.id
                );
            }
        }
        AccountCommands::Password { username, password } => {
            let result = client.reset_password(&username, &password).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{} Password replaced for {}.", "Success!".green(), username.bold());
            }
        }
        AccountCommands::Ban {
            username,
            reason,
            duration,
        } => {
            let result = client
                .ban_account(&username, &reason, hours_to_secs(duration))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "{} Account {} has been banned (ID: {}).",
                    "Success!".green(),
                    username.bold(),
                    result.ban_id
                );
                if result.sessions_kicked > 0 {
                    println!("  {} session(s) were disconnected.", result.sessions_kicked);
                }
            }
        }
        AccountCommands::Unban { username } => {
            let result = client.unban_account(&username).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.lifted > 0 {
                println!("{} Lifted {} ban(s) on {}.", "Success!".green(), result.lifted, username.bold());
            } else {
                println!("{} {} has no active bans.", "Note:".yellow(), username);
            }
        }
        AccountCommands::Lock { username, unlock } => {
            let result = client.set_lock(&username, !unlock).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let status = if unlock { "unlocked".green() } else { "locked".red() };
                println!("{} Account {} {}.", "Success!".green(), username.bold(), status);
            }
        }
        AccountCommands::Security { username, level } => {
            let result = client.set_security(&username, &level).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{} {} is now {}.", "Success!".green(), username.bold(), level);
            }
        }
        AccountCommands::Totp { username, secret } => {
            let result = client.set_totp(&username, secret.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if secret.is_some() {
                println!("{} Authenticator set for {}.", "Success!".green(), username.bold());
            } else {
                println!("{} Authenticator cleared for {}.", "Success!".green(), username.bold());
            }
        }
        AccountCommands::Kick { username } => {
            let result = client.kick_account(&username).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.sessions_kicked > 0 {
                println!(
                    "{} Disconnected {} session(s) of {}.",
                    "Success!".green(),
                    result.sessions_kicked,
                    username.bold()
                );
            } else {
                println!("{} {} is not online.", "Note:".yellow(), username);
            }
        }
    }
    Ok(())
}

async fn handle_ban_command(client: &AdminClient, action: BanCommands, json: bool) -> Result<()> {
    match action {
        BanCommands::List => {
            let bans = client.list_bans().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&bans)?);
            } else if bans.is_empty() {
                println!("{}", "No bans in force.".yellow());
            } else {
                println!("{} ban(s):\n", bans.len());
                for b in bans {
                    let until = b
                        .expires_at
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "permanent".to_string());
                    println!(
                        "  [{}] {} - {} by {} (until: {})",
                        b.id,
                        b.target().bold(),
                        b.reason,
                        b.banned_by,
                        until
                    );
                }
            }
        }
        BanCommands::Create {
            ip,
            reason,
            duration,
        } => {
            let result = client.ban_ip(&ip, &reason, hours_to_secs(duration)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{} Ban created with ID {}", "Success!".green(), result.id);
            }
        }
        BanCommands::Remove { ip } => {
            let result = client.unban_ip(&ip).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.lifted > 0 {
                println!("{} Bans on {} have been lifted.", "Success!".green(), ip);
            } else {
                println!("{} No active ban on {}.", "Error:".red(), ip);
            }
        }
    }
    Ok(())
}

async fn run_interactive_mode(client: &AdminClient) -> Result<()> {
    use rustyline::DefaultEditor;

    println!("{}", "\nRealmgate - Admin Tools Interactive Mode".bold());
    println!("Type 'help' for available commands, 'quit' to exit.\n");

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("admin> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                let parts: Vec<&str> = line.split_whitespace().collect();
                match parts.as_slice() {
                    ["quit"] | ["exit"] | ["q"] => {
                        println!("Goodbye!");
                        break;
                    }
                    ["help"] | ["?"] => {
                        print_interactive_help();
                    }
                    ["stats"] => match client.get_stats().await {
                        Ok(stats) => {
                            println!(
                                "Connections: {}, logon authed: {}, world authed: {}, uptime {}",
                                stats.total_connections,
                                stats.logon_authenticated,
                                stats.world_authenticated,
                                format_duration(stats.uptime_secs)
                            );
                        }
                        Err(e) => println!("{} {}", "Error:".red(), e),
                    },
                    ["sessions"] => match client.list_sessions(None, None).await {
                        Ok(sessions) => {
                            if sessions.is_empty() {
                                println!("No live sessions.");
                            } else {
                                for s in &sessions {
                                    print_session(s);
                                }
                            }
                        }
                        Err(e) => println!("{} {}", "Error:".red(), e),
                    },
                    ["account", username] => match client.get_account(username).await {
                        Ok(account) => {
                            let banned = if account.active_ban.is_some() { " [BANNED]" } else { "" };
                            println!(
                                "{} ({}) - {} session(s){}",
                                account.summary.username,
                                account.summary.security,
                                account.sessions.len(),
                                banned
                            );
                        }
                        Err(e) => println!("{} {}", "Error:".red(), e),
                    },
                    ["kick", username] => match client.kick_account(username).await {
                        Ok(r) => {
                            if r.sessions_kicked > 0 {
                                println!("Kicked {} ({} sessions)", username, r.sessions_kicked);
                            } else {
                                println!("{} is not online", username);
                            }
                        }
                        Err(e) => println!("{} {}", "Error:".red(), e),
                    },
                    ["ban", username, reason @ ..] if !reason.is_empty() => {
                        match client.ban_account(username, &reason.join(" "), None).await {
                            Ok(r) => println!("Banned {} (ID {})", username, r.ban_id),
                            Err(e) => println!("{} {}", "Error:".red(), e),
                        }
                    }
                    ["unban", username] => match client.unban_account(username).await {
                        Ok(r) => println!("Lifted {} ban(s) on {}", r.lifted, username),
                        Err(e) => println!("{} {}", "Error:".red(), e),
                    },
                    ["bans"] => match client.list_bans().await {
                        Ok(bans) => {
                            if bans.is_empty() {
                                println!("No active bans.");
                            } else {
                                for b in bans {
                                    println!("  [{}] {} - {}", b.id, b.target(), b.reason);
                                }
                            }
                        }
                        Err(e) => println!("{} {}", "Error:".red(), e),
                    },
                    _ => {
                        println!("Unknown command. Type 'help' for available commands.");
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn print_interactive_help() {
    println!("{}", "Available commands:".bold());
    println!("  stats                    - Show server statistics");
    println!("  sessions                 - List live sessions");
    println!("  account <name>           - Show account info");
    println!("  kick <name>              - Disconnect an account");
    println!("  ban <name> <reason...>   - Permanently ban an account");
    println!("  unban <name>             - Lift an account's bans");
    println!("  bans                     - List active bans");
    println!("  help                     - Show this help");
    println!("  quit                     - Exit interactive mode");
    println!();
    println!("For advanced commands, use the CLI directly:");
    println!("  admin_tools --help");
}
