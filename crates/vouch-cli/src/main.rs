use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vouch_capability::{InviteTokenAuthority, InviteTokenConfig, DEFAULT_INVITE_TTL_SECONDS};
use vouch_core::current_unix_timestamp_ms;
use vouch_directory::{AccountDirectory, AccountRecord, FileAccountDirectory};
use vouch_gateway::onboarding_api::{run_onboarding_gateway, OnboardingGatewayConfig};
use vouch_mailer::{
    AccessCodeMailer, NoopAccessCodeMailer, SmtpAccessCodeMailer, SmtpMailerConfig,
};
use vouch_setup::{generate_access_code, OnboardingPolicy, OnboardingService};

#[derive(Debug, Parser)]
#[command(
    name = "vouch",
    about = "Signed-capability onboarding: invitation tokens, access codes, and the auth gateway",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "VOUCH_STATE_DIR",
        default_value = ".vouch",
        help = "Directory holding the account directory state file"
    )]
    state_dir: PathBuf,

    #[arg(
        long,
        env = "VOUCH_CAPABILITY_SECRET",
        help = "Secret used to sign and verify invitation tokens"
    )]
    capability_secret: String,

    #[arg(
        long,
        env = "VOUCH_INVITE_TTL_SECONDS",
        default_value_t = DEFAULT_INVITE_TTL_SECONDS,
        help = "Invitation token lifetime in seconds"
    )]
    invite_ttl_seconds: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the onboarding gateway.
    Serve(ServeArgs),
    /// Issue an invitation token for an account and print the setup link.
    Invite(InviteArgs),
    /// Generate and store an access code for an account.
    AccessCode(AccessCodeArgs),
    /// Reset an account back to pending setup.
    Reset(ResetArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, env = "VOUCH_BIND", default_value = "127.0.0.1:8787")]
    bind: String,

    #[arg(
        long,
        help = "Accept invitation tokens against accounts whose setup already completed"
    )]
    allow_token_resubmission: bool,

    #[arg(long, env = "SMTP_HOST", help = "SMTP relay host; codes are logged when unset")]
    smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    smtp_port: u16,

    #[arg(long, env = "SMTP_USER")]
    smtp_username: Option<String>,

    #[arg(long, env = "SMTP_PASS")]
    smtp_password: Option<String>,

    #[arg(long, env = "SMTP_SENDER", help = "From address; falls back to --smtp-username")]
    smtp_sender: Option<String>,

    #[arg(long, env = "SMTP_SENDER_NAME")]
    smtp_sender_name: Option<String>,

    #[arg(long, env = "SMTP_DISABLE_TLS")]
    smtp_disable_tls: bool,
}

#[derive(Debug, Args)]
struct InviteArgs {
    #[arg(long)]
    email: String,

    #[arg(
        long,
        env = "VOUCH_SETUP_URL_BASE",
        default_value = "http://127.0.0.1:8787/setup-account",
        help = "Base URL the invitation token is appended to"
    )]
    setup_url_base: String,
}

#[derive(Debug, Args)]
struct AccessCodeArgs {
    #[arg(long)]
    email: String,
}

#[derive(Debug, Args)]
struct ResetArgs {
    #[arg(long)]
    email: String,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let directory = Arc::new(
        FileAccountDirectory::open(cli.state_dir.join("accounts.json"))
            .context("failed to open account directory")?,
    );
    let authority = InviteTokenAuthority::new(InviteTokenConfig {
        secret: cli.capability_secret.clone(),
        ttl_seconds: cli.invite_ttl_seconds,
    })?;

    match cli.command {
        Command::Serve(args) => run_serve(directory, authority, args).await,
        Command::Invite(args) => run_invite(directory, &authority, args).await,
        Command::AccessCode(args) => run_access_code(directory, args).await,
        Command::Reset(args) => run_reset(directory, args).await,
    }
}

async fn run_serve(
    directory: Arc<FileAccountDirectory>,
    authority: InviteTokenAuthority,
    args: ServeArgs,
) -> Result<()> {
    let mailer: Arc<dyn AccessCodeMailer> = match args.smtp_host {
        Some(host) => {
            let from_address = args
                .smtp_sender
                .or_else(|| args.smtp_username.clone())
                .context("--smtp-sender (or --smtp-username) is required with --smtp-host")?;
            Arc::new(SmtpAccessCodeMailer::new(SmtpMailerConfig {
                host,
                port: args.smtp_port,
                username: args.smtp_username,
                password: args.smtp_password,
                use_tls: !args.smtp_disable_tls,
                from_address,
                from_name: args.smtp_sender_name,
            })?)
        }
        None => {
            tracing::warn!("smtp is not configured; access codes are logged instead of emailed");
            Arc::new(NoopAccessCodeMailer)
        }
    };

    let service = Arc::new(OnboardingService::new(
        directory as Arc<dyn AccountDirectory>,
        mailer,
        authority,
        OnboardingPolicy {
            allow_token_resubmission: args.allow_token_resubmission,
        },
    ));
    run_onboarding_gateway(OnboardingGatewayConfig {
        bind: args.bind,
        service,
    })
    .await
}

async fn run_invite(
    directory: Arc<FileAccountDirectory>,
    authority: &InviteTokenAuthority,
    args: InviteArgs,
) -> Result<()> {
    let account = find_or_create_account(directory.as_ref(), &args.email).await?;
    let token = authority.issue(&account.user_id, &account.email)?;
    println!(
        "invite issued: email={} user_id={}",
        account.email, account.user_id
    );
    println!("{}?token={}", args.setup_url_base.trim_end_matches('?'), token);
    Ok(())
}

async fn run_access_code(directory: Arc<FileAccountDirectory>, args: AccessCodeArgs) -> Result<()> {
    let account = find_or_create_account(directory.as_ref(), &args.email).await?;
    let code = generate_access_code();
    directory.store_access_code(&account.user_id, &code).await?;
    println!(
        "access code stored: email={} user_id={} code={}",
        account.email, account.user_id, code
    );
    Ok(())
}

async fn run_reset(directory: Arc<FileAccountDirectory>, args: ResetArgs) -> Result<()> {
    let Some(account) = directory.find_by_email(&args.email).await? else {
        bail!("no account exists for '{}'", args.email.trim());
    };
    directory.reset_setup(&account.user_id).await?;
    println!(
        "setup reset: email={} user_id={} (next login re-enters the setup flow)",
        account.email, account.user_id
    );
    Ok(())
}

async fn find_or_create_account(
    directory: &FileAccountDirectory,
    email: &str,
) -> Result<AccountRecord> {
    let email = email.trim();
    if email.is_empty() {
        bail!("--email cannot be empty");
    }
    if let Some(account) = directory.find_by_email(email).await? {
        println!("found existing account: user_id={}", account.user_id);
        return Ok(account);
    }
    let account = directory
        .create_account(email, current_unix_timestamp_ms())
        .await?;
    println!("provisioned pending account: user_id={}", account.user_id);
    Ok(account)
}
