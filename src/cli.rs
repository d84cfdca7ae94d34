use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "storehub")]
#[command(author, version, about = "Multi-tenant Telegram store platform", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the mother bot and every active store bot (default)
    Run,

    /// Apply pending database migrations and exit
    Migrate,

    /// List registered stores and their recorded bot status
    Tenants {
        /// Only show stores that are active
        #[arg(long)]
        active: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
