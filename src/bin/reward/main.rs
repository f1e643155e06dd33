//! Reward Engine CLI
//!
//! Operator command-line interface for the Reward Engine.

mod client;
mod commands;
mod style;

use clap::{Parser, Subcommand, ValueEnum};
use reward_engine::{ActivityType, Platform};
use style::*;

const BANNER: &str = r#"
  ██████╗ ███████╗██╗    ██╗ █████╗ ██████╗ ██████╗
  ██╔══██╗██╔════╝██║    ██║██╔══██╗██╔══██╗██╔══██╗
  ██████╔╝█████╗  ██║ █╗ ██║███████║██████╔╝██║  ██║
  ██╔══██╗██╔══╝  ██║███╗██║██╔══██║██╔══██╗██║  ██║
  ██║  ██║███████╗╚███╔███╔╝██║  ██║██║  ██║██████╔╝
  ╚═╝  ╚═╝╚══════╝ ╚══╝╚══╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚═════╝
"#;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "reward")]
#[command(author = "CortexLM")]
#[command(version)]
#[command(about = "Reward Engine - Mining, XP and referral rewards", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Reward server endpoint
    #[arg(
        short,
        long,
        env = "REWARD_SERVER_URL",
        default_value = "http://localhost:8080",
        global = true
    )]
    server: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reward server
    #[command(visible_alias = "s")]
    Server {
        /// Host to bind
        #[arg(long, env = "REWARD_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "REWARD_PORT")]
        port: Option<u16>,

        /// Configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show a user's mining status
    #[command(visible_alias = "st")]
    Status {
        /// User id
        user: String,
    },

    /// Start, stop or claim a mining session
    #[command(visible_alias = "m")]
    Mine {
        #[command(subcommand)]
        action: MineAction,
    },

    /// Compute an hourly mining rate offline, with its breakdown
    Rate {
        /// Total users on the network (selects the phase)
        #[arg(long, default_value = "0")]
        network_users: u64,

        /// Token holdings
        #[arg(long, default_value = "0")]
        holdings: f64,

        /// Active direct referrals
        #[arg(long, default_value = "0")]
        referrals: u32,

        /// XP level
        #[arg(long, default_value = "1")]
        level: u32,

        /// Referral tier index (0-4)
        #[arg(long, default_value = "0")]
        rp_tier: u32,

        /// Treat the account as KYC-verified
        #[arg(long)]
        kyc: bool,

        /// Quality score (0.5-2.0)
        #[arg(long, default_value = "1.0")]
        quality: f64,

        /// Product of live boost multipliers
        #[arg(long, default_value = "1.0")]
        boost: f64,
    },

    /// Compute an XP award offline
    Xp {
        /// Activity type
        #[arg(value_enum)]
        activity: ActivityArg,

        /// Platform the activity happened on
        #[arg(long, value_enum, default_value = "app")]
        platform: PlatformArg,

        /// Quality score
        #[arg(long, default_value = "1.0")]
        quality: f64,

        /// Current streak in days
        #[arg(long, default_value = "0")]
        streak: u32,

        /// Current level
        #[arg(long, default_value = "1")]
        level: u32,
    },

    /// Compute referral points and tier offline
    #[command(visible_alias = "rp")]
    Referral {
        /// Direct referrals
        #[arg(long)]
        direct: u32,

        /// Direct referrals active in the rolling window
        #[arg(long)]
        active: u32,

        /// Network size across three degrees
        #[arg(long)]
        network: u32,
    },

    /// Show the server's engine configuration
    Config,
}

#[derive(Subcommand)]
enum MineAction {
    /// Start a mining session
    Start { user: String },
    /// Stop the active session
    Stop { user: String },
    /// Claim a session's accrued reward
    Claim {
        user: String,
        /// Session to claim; defaults to the user's current session
        #[arg(long)]
        session: Option<uuid::Uuid>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ActivityArg {
    OriginalPost,
    PhotoPost,
    VideoPost,
    Story,
    Comment,
    Like,
    Share,
    Follow,
    DailyLogin,
    DailyQuest,
    Milestone,
    ViralContent,
}

impl From<ActivityArg> for ActivityType {
    fn from(a: ActivityArg) -> Self {
        match a {
            ActivityArg::OriginalPost => ActivityType::OriginalPost,
            ActivityArg::PhotoPost => ActivityType::PhotoPost,
            ActivityArg::VideoPost => ActivityType::VideoPost,
            ActivityArg::Story => ActivityType::Story,
            ActivityArg::Comment => ActivityType::Comment,
            ActivityArg::Like => ActivityType::Like,
            ActivityArg::Share => ActivityType::Share,
            ActivityArg::Follow => ActivityType::Follow,
            ActivityArg::DailyLogin => ActivityType::DailyLogin,
            ActivityArg::DailyQuest => ActivityType::DailyQuest,
            ActivityArg::Milestone => ActivityType::Milestone,
            ActivityArg::ViralContent => ActivityType::ViralContent,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Tiktok,
    Instagram,
    Youtube,
    X,
    Facebook,
    App,
}

impl From<PlatformArg> for Platform {
    fn from(p: PlatformArg) -> Self {
        match p {
            PlatformArg::Tiktok => Platform::Tiktok,
            PlatformArg::Instagram => Platform::Instagram,
            PlatformArg::Youtube => Platform::Youtube,
            PlatformArg::X => Platform::X,
            PlatformArg::Facebook => Platform::Facebook,
            PlatformArg::App => Platform::App,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let result = match cli.command {
        Commands::Server { host, port, config } => {
            print_banner();
            commands::server::run(&config, host, port).await
        }
        Commands::Status { user } => commands::status::run(&cli.server, &user).await,
        Commands::Mine { action } => match action {
            MineAction::Start { user } => commands::mine::start(&cli.server, &user).await,
            MineAction::Stop { user } => commands::mine::stop(&cli.server, &user).await,
            MineAction::Claim { user, session } => {
                commands::mine::claim(&cli.server, &user, session).await
            }
        },
        Commands::Rate {
            network_users,
            holdings,
            referrals,
            level,
            rp_tier,
            kyc,
            quality,
            boost,
        } => commands::rate::run(commands::rate::RateArgs {
            network_users,
            holdings,
            referrals,
            level,
            rp_tier,
            kyc,
            quality,
            boost,
        }),
        Commands::Xp {
            activity,
            platform,
            quality,
            streak,
            level,
        } => commands::xp::run(activity.into(), platform.into(), quality, streak, level),
        Commands::Referral {
            direct,
            active,
            network,
        } => commands::referral::run(direct, active, network),
        Commands::Config => commands::config::run(&cli.server).await,
    };

    if let Err(e) = result {
        print_error(&format!("{}", e));
        std::process::exit(1);
    }
}

pub fn print_banner() {
    println!("{}", style_cyan(BANNER));
    println!(
        "  {} {}",
        style_dim("Reward Engine"),
        style_dim(&format!("v{}", VERSION))
    );
    println!();
}
