//! CLI module for the ServiceHub command-line client.
//!
//! Provides subcommands that drive the session and booking layers against a
//! running marketplace server:
//! - `register` - create a customer or provider account
//! - `login` / `logout` / `whoami` - manage the stored session
//! - `match` - search for providers near a location
//! - `book` - create a booking
//! - `bookings mine|assigned` - list bookings, grouped by state
//! - `accept` / `reject` / `complete` / `cancel` - booking transitions
//! - `config check` - validate the configuration file

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::api::{ActionError, ApiClient};
use crate::booking::{Booking, BookingOrchestrator, BookingPartition, NewBooking, Party};
use crate::config::Config;
use crate::guard::{Access, Navigator, Route};
use crate::matching::{build_booking_from_match, Matcher};
use crate::session::{
    CredentialStore, FileStorage, MemoryStorage, Role, SessionEvent, SessionManager, SessionStatus,
};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "servicehub")]
#[command(author, version, about = "Command-line client for the ServiceHub marketplace", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "servicehub.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// API URL to connect to (overrides [api] base_url)
    #[arg(long, env = "SERVICEHUB_API_URL")]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an account
    Register {
        #[arg(short, long)]
        email: String,
        /// Password (can also be set via SERVICEHUB_PASSWORD env var)
        #[arg(short, long, env = "SERVICEHUB_PASSWORD", hide_env_values = true)]
        password: String,
        /// Display name
        #[arg(short, long)]
        name: Option<String>,
        /// Account type: customer or provider
        #[arg(long, default_value = "customer", value_parser = parse_role)]
        role: Role,
        /// Sign in with the new account right away
        #[arg(long)]
        login: bool,
    },

    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,
        /// Password (can also be set via SERVICEHUB_PASSWORD env var)
        #[arg(short, long, env = "SERVICEHUB_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the signed-in account
    Whoami,

    /// Find providers for a service near a location
    Match {
        /// Global service id
        #[arg(long)]
        service: i64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Search radius in km (2-20, default from config)
        #[arg(short, long)]
        radius: Option<f64>,
        /// Book the best match right away
        #[arg(long)]
        book: bool,
    },

    /// Create a booking
    Book {
        /// Concrete service id
        #[arg(long, conflicts_with = "global_service")]
        service: Option<i64>,
        /// Global service (category) id; the server picks a provider
        #[arg(long)]
        global_service: Option<i64>,
        /// Preferred provider
        #[arg(long)]
        provider: Option<i64>,
        /// RFC 3339 timestamp; defaults to now plus the quick-book lead
        #[arg(long)]
        at: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lon: Option<f64>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Booking lists
    #[command(subcommand)]
    Bookings(BookingsCommands),

    /// Accept a booking (provider)
    Accept { id: i64 },

    /// Decline a booking (provider)
    Reject { id: i64 },

    /// Mark a booking as done (provider)
    Complete { id: i64 },

    /// Cancel a booking
    Cancel {
        id: i64,
        #[arg(long)]
        reason: Option<String>,
        /// Cancel as the assigned provider instead of the requester
        #[arg(long)]
        as_provider: bool,
    },

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Bookings subcommands
#[derive(Subcommand, Debug)]
pub enum BookingsCommands {
    /// Bookings you requested
    Mine,
    /// Bookings assigned or open to you as a provider
    Assigned,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

// ============================================================================
// Client context
// ============================================================================

/// Everything one command invocation needs: a bootstrapped session, an API
/// client and a navigator listening for session events.
struct Context {
    config: Config,
    session: SessionManager,
    api: ApiClient,
    navigator: Navigator,
    events: broadcast::Receiver<SessionEvent>,
}

impl Context {
    async fn init(cli: &Cli, mut config: Config) -> Result<Self> {
        if let Some(url) = &cli.api_url {
            config.api.base_url = url.clone();
        }

        let store = if config.storage.persist {
            CredentialStore::new(Box::new(FileStorage::new(&config.storage.session_file)))
        } else {
            CredentialStore::new(Box::new(MemoryStorage::default()))
        };
        let session = SessionManager::new(store);
        let api = ApiClient::from_config(&config, session.clone())
            .context("Failed to create HTTP client")?;
        let events = session.subscribe();

        let status = session.bootstrap(&api).await;
        tracing::debug!(?status, base_url = %config.api.base_url, "Session bootstrapped");

        Ok(Self {
            config,
            session,
            api,
            navigator: Navigator::new(Route::Home),
            events,
        })
    }

    /// Ask the guard whether the current session may open `route`.
    fn enter(&mut self, route: Route) -> Result<()> {
        let snapshot = self.session.snapshot();
        match self.navigator.navigate(route.clone(), &snapshot) {
            Access::Render => Ok(()),
            Access::ShowLoading => anyhow::bail!("Session is still being confirmed, try again."),
            Access::RedirectTo(Route::Login) => {
                anyhow::bail!("Not signed in. Run `servicehub login` first.")
            }
            Access::RedirectTo(_) => {
                let role = snapshot.role().map(|r| r.to_string()).unwrap_or_default();
                anyhow::bail!("A {} account cannot open {}.", role, route)
            }
        }
    }

    /// Turn an action failure into a command error, noticing session expiry.
    fn fail(&mut self, err: ActionError) -> anyhow::Error {
        if self.navigator.drain(&mut self.events) == Some(Route::Login) || !err.is_inline() {
            return anyhow::anyhow!("Session expired. Run `servicehub login` to sign in again.");
        }
        anyhow::anyhow!("[{}] {}", err.kind().as_str(), err)
    }
}

// ============================================================================
// CLI Command Handlers
// ============================================================================

/// Run a CLI command
pub async fn run_command(cli: &Cli, config: Config) -> Result<()> {
    if let Commands::Config(ConfigCommands::Check) = &cli.command {
        return cmd_config_check(cli);
    }

    let mut ctx = Context::init(cli, config).await?;
    match &cli.command {
        Commands::Register {
            email,
            password,
            name,
            role,
            login,
        } => cmd_register(&mut ctx, email, password, name.as_deref(), *role, *login).await,
        Commands::Login { email, password } => cmd_login(&mut ctx, email, password).await,
        Commands::Logout => cmd_logout(&ctx),
        Commands::Whoami => cmd_whoami(&ctx),
        Commands::Match {
            service,
            lat,
            lon,
            radius,
            book,
        } => cmd_match(&mut ctx, *service, *lat, *lon, *radius, *book).await,
        Commands::Book {
            service,
            global_service,
            provider,
            at,
            lat,
            lon,
            address,
            notes,
        } => {
            let mut draft = NewBooking {
                service_id: *service,
                global_service_id: *global_service,
                provider_id: *provider,
                notes: notes.clone(),
                ..Default::default()
            };
            if let Some(at) = at {
                let at = DateTime::parse_from_rfc3339(at)
                    .with_context(|| format!("Invalid --at timestamp: {}", at))?;
                draft.scheduled_at = Some(at.with_timezone(&Utc));
            }
            if let (Some(lat), Some(lon)) = (lat, lon) {
                draft = draft.at(*lat, *lon);
            }
            if let Some(address) = address {
                draft = draft.with_address(address.clone());
            }
            cmd_book(&mut ctx, draft).await
        }
        Commands::Bookings(BookingsCommands::Mine) => cmd_bookings(&mut ctx, Party::Requester).await,
        Commands::Bookings(BookingsCommands::Assigned) => {
            cmd_bookings(&mut ctx, Party::Provider).await
        }
        Commands::Accept { id } => cmd_transition(&mut ctx, *id, Action::Accept).await,
        Commands::Reject { id } => cmd_transition(&mut ctx, *id, Action::Reject).await,
        Commands::Complete { id } => cmd_transition(&mut ctx, *id, Action::Complete).await,
        Commands::Cancel {
            id,
            reason,
            as_provider,
        } => {
            let action = Action::Cancel {
                reason: reason.clone(),
                as_provider: *as_provider,
            };
            cmd_transition(&mut ctx, *id, action).await
        }
        Commands::Config(ConfigCommands::Check) => cmd_config_check(cli),
    }
}

async fn cmd_register(
    ctx: &mut Context,
    email: &str,
    password: &str,
    name: Option<&str>,
    role: Role,
    login: bool,
) -> Result<()> {
    ctx.navigator.navigate(Route::Register, &ctx.session.snapshot());

    let result = ctx
        .session
        .register(&ctx.api, email, password, name, role)
        .await;
    let identity = match result {
        Ok(identity) => identity,
        Err(err) => return Err(ctx.fail(err)),
    };

    println!("Account #{} created for {} ({})", identity.id, identity.email, identity.role);
    if login {
        cmd_login(ctx, email, password).await
    } else {
        println!("Run `servicehub login` to sign in.");
        Ok(())
    }
}

async fn cmd_login(ctx: &mut Context, email: &str, password: &str) -> Result<()> {
    ctx.navigator.navigate(Route::Login, &ctx.session.snapshot());

    let result = ctx
        .session
        .login_with_password(&ctx.api, email, password)
        .await;
    let identity = match result {
        Ok(identity) => identity,
        Err(err) => return Err(ctx.fail(err)),
    };

    println!("Signed in as {} ({})", identity.email, identity.role);
    if ctx.config.storage.persist {
        println!("Session saved to {}", ctx.config.storage.session_file.display());
    }
    Ok(())
}

fn cmd_logout(ctx: &Context) -> Result<()> {
    let was_signed_in = ctx.session.snapshot().is_authenticated();
    ctx.session.logout();
    if was_signed_in {
        println!("Signed out.");
    } else {
        println!("Not signed in.");
    }
    Ok(())
}

fn cmd_whoami(ctx: &Context) -> Result<()> {
    let snapshot = ctx.session.snapshot();
    match (snapshot.status, &snapshot.identity) {
        (SessionStatus::Authenticated, Some(identity)) => {
            println!();
            println!("ID:     {}", identity.id);
            println!("Email:  {}", if identity.email.is_empty() { "-" } else { identity.email.as_str() });
            if let Some(name) = &identity.name {
                println!("Name:   {}", name);
            }
            println!("Role:   {}", identity.role);
            println!();
        }
        _ => println!("Not signed in."),
    }
    Ok(())
}

async fn cmd_match(
    ctx: &mut Context,
    service: i64,
    lat: f64,
    lon: f64,
    radius: Option<f64>,
    book: bool,
) -> Result<()> {
    ctx.enter(Route::Match)?;

    let matcher = Matcher::new(ctx.api.clone()).with_config(&ctx.config);
    let query = matcher.query(service, lat, lon, radius);
    let outcome = match matcher.search(&query).await {
        Ok(outcome) => outcome,
        Err(err) => return Err(ctx.fail(err)),
    };

    if !outcome.has_results {
        println!("No providers found within {} km.", query.radius_km);
        return Ok(());
    }

    println!();
    println!(
        "{:<4}  {:<10}  {:<10}  {:<12}  {:<8}  {:<8}",
        "#", "PROVIDER", "SERVICE", "DISTANCE", "RATING", "SCORE"
    );
    println!("{}", "-".repeat(62));
    for (rank, m) in outcome.results.iter().enumerate() {
        println!(
            "{:<4}  {:<10}  {:<10}  {:<12}  {:<8}  {:<8}",
            rank + 1,
            m.provider_id,
            opt(m.service_id),
            m.distance_km.map(|d| format!("{:.1} km", d)).unwrap_or_else(|| "-".into()),
            m.rating.map(|r| format!("{:.1}", r)).unwrap_or_else(|| "-".into()),
            m.score.map(|s| format!("{:.2}", s)).unwrap_or_else(|| "-".into()),
        );
    }
    println!();

    if book {
        let Some(best) = outcome.results.first() else {
            return Ok(());
        };
        let draft = match best.service_id {
            Some(service_id) => build_booking_from_match(best.provider_id, service_id),
            None => NewBooking::for_global_service(service).with_provider(best.provider_id),
        }
        .at(lat, lon);
        cmd_book(ctx, draft).await?;
    }
    Ok(())
}

async fn cmd_book(ctx: &mut Context, draft: NewBooking) -> Result<()> {
    ctx.enter(Route::Book)?;

    let board = BookingOrchestrator::for_requester(ctx.api.clone()).with_config(&ctx.config);
    let booking = match board.create(&draft).await {
        Ok(booking) => booking,
        Err(err) => return Err(ctx.fail(err)),
    };

    println!("Booking #{} created ({}).", booking.id, booking.status);
    match booking.provider_id {
        Some(p) => println!("Provider: {}", p),
        None => println!("Provider: not yet assigned (open request)"),
    }
    if let Some(at) = booking.scheduled_at {
        println!("Scheduled: {}", at.to_rfc3339());
    }
    Ok(())
}

async fn cmd_bookings(ctx: &mut Context, perspective: Party) -> Result<()> {
    let route = match perspective {
        Party::Requester => Route::Bookings,
        Party::Provider => Route::ProviderBookings,
    };
    ctx.enter(route)?;

    let board = BookingOrchestrator::new(ctx.api.clone(), perspective);
    let loaded = match perspective {
        Party::Requester => board.load_mine().await,
        Party::Provider => board.load_assigned().await,
    };
    let partition = match loaded {
        Ok(partition) => partition,
        Err(err) => return Err(ctx.fail(err)),
    };

    print_partition(&partition, perspective);
    Ok(())
}

enum Action {
    Accept,
    Reject,
    Complete,
    Cancel { reason: Option<String>, as_provider: bool },
}

async fn cmd_transition(ctx: &mut Context, id: i64, action: Action) -> Result<()> {
    let perspective = match &action {
        Action::Cancel {
            as_provider: false, ..
        } => Party::Requester,
        _ => Party::Provider,
    };
    let route = match perspective {
        Party::Requester => Route::Bookings,
        Party::Provider => Route::ProviderBookings,
    };
    ctx.enter(route)?;

    // Transitions apply to a loaded board, the same as on screen.
    let board = BookingOrchestrator::new(ctx.api.clone(), perspective);
    let loaded = match perspective {
        Party::Requester => board.load_mine().await,
        Party::Provider => board.load_assigned().await,
    };
    if let Err(err) = loaded {
        return Err(ctx.fail(err));
    }

    let result = match action {
        Action::Accept => board.accept(id).await,
        Action::Reject => board.reject(id).await,
        Action::Complete => board.complete(id).await,
        Action::Cancel { reason, .. } => board.cancel(id, reason).await,
    };

    match result {
        Ok(booking) => {
            println!("Booking #{} is now {}.", booking.id, booking.status);
            Ok(())
        }
        Err(err) => Err(ctx.fail(err)),
    }
}

fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("Defaults will be used.");
        return Ok(());
    }

    match Config::load(config_path) {
        Ok(config) => {
            println!("[OK] Configuration file is valid!");
            println!();
            println!("API:");
            println!("  Base URL:     {}", config.api.base_url);
            println!("  Timeout:      {}s", config.api.timeout().as_secs());
            println!();
            println!("Storage:");
            println!(
                "  Session:      {}",
                if config.storage.persist {
                    config.storage.session_file.display().to_string()
                } else {
                    "in memory only".to_string()
                }
            );
            println!();
            println!("Booking:");
            println!("  Quick-book lead: {} min", config.booking.quick_book_lead().num_minutes());
            println!("  Match radius:    {} km", config.matching.default_radius_km);
            println!();
            Ok(())
        }
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {:#}", e);
            anyhow::bail!("Configuration validation failed")
        }
    }
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_partition(partition: &BookingPartition, perspective: Party) {
    if partition.is_empty() {
        println!("No bookings found.");
        return;
    }

    let unassigned_title = match perspective {
        Party::Requester => "Open requests",
        Party::Provider => "Incoming",
    };
    print_group(unassigned_title, &partition.unassigned);
    print_group("Awaiting provider", &partition.awaiting);
    print_group("Active", &partition.active);
    print_group("Completed", &partition.completed);
    print_group("Cancelled / rejected", &partition.closed);
}

fn print_group(title: &str, bookings: &[Booking]) {
    if bookings.is_empty() {
        return;
    }

    println!();
    println!("{} ({})", title, bookings.len());
    println!(
        "  {:<8}  {:<12}  {:<10}  {:<25}  {:<30}",
        "ID", "STATUS", "PROVIDER", "SCHEDULED", "SERVICE"
    );
    println!("  {}", "-".repeat(93));
    for b in bookings {
        let service = b
            .service_title
            .clone()
            .or_else(|| b.service_id.map(|id| format!("service {}", id)))
            .or_else(|| b.global_service_id.map(|id| format!("category {}", id)))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<8}  {:<12}  {:<10}  {:<25}  {:<30}",
            b.id,
            b.status,
            opt(b.provider_id),
            b.scheduled_at
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "-".to_string()),
            truncate(&service, 30),
        );
    }
}

fn parse_role(raw: &str) -> Result<Role, String> {
    Role::parse(raw).ok_or_else(|| format!("unknown role '{}', expected customer or provider", raw))
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer service title", 10), "a much ...");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_opt() {
        assert_eq!(opt(Some(5)), "5");
        assert_eq!(opt::<i64>(None), "-");
    }

    #[test]
    fn test_parse_cancel_as_provider() {
        let cli = Cli::try_parse_from([
            "servicehub",
            "cancel",
            "42",
            "--reason",
            "Sick",
            "--as-provider",
        ])
        .unwrap();
        match cli.command {
            Commands::Cancel {
                id,
                reason,
                as_provider,
            } => {
                assert_eq!(id, 42);
                assert_eq!(reason.as_deref(), Some("Sick"));
                assert!(as_provider);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_match_with_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "servicehub", "match", "--service", "7", "--lat", "-33.9", "--lon", "18.4", "-r", "10",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Match { service: 7, radius: Some(r), .. } if r == 10.0
        ));
    }

    #[test]
    fn test_parse_register() {
        let cli = Cli::try_parse_from([
            "servicehub", "register", "-e", "new@example.com", "-p", "pw", "--role", "Provider",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Register { role: Role::Provider, login: false, name: None, .. }
        ));

        let cli = Cli::try_parse_from(["servicehub", "register", "-e", "a@example.com", "-p", "pw"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Register { role: Role::Customer, .. }));

        assert!(Cli::try_parse_from([
            "servicehub", "register", "-e", "a@example.com", "-p", "pw", "--role", "wizard",
        ])
        .is_err());
    }

    #[test]
    fn test_book_rejects_both_service_kinds() {
        let parsed = Cli::try_parse_from([
            "servicehub",
            "book",
            "--service",
            "1",
            "--global-service",
            "2",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_config_check_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "servicehub",
            "--config",
            dir.path().join("missing.toml").to_str().unwrap(),
            "config",
            "check",
        ])
        .unwrap();
        assert!(cmd_config_check(&cli).is_ok());
    }
}
