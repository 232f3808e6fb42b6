use clap::Parser;

use crate::ack::AckCategory;

#[derive(Debug, Parser)]
#[command(
    name = "subgraph-health",
    about = "Monitor health of subgraphs with active allocations"
)]
pub struct Cli {
    /// Create a default config file and exit.
    #[arg(long)]
    pub init: bool,

    /// Acknowledge an issue for a deployment.
    #[arg(long, value_name = "IPFS_HASH")]
    pub ack: Option<String>,

    /// Remove an acknowledgement.
    #[arg(long, value_name = "IPFS_HASH")]
    pub unack: Option<String>,

    /// List all acknowledgements.
    #[arg(long = "list-ack")]
    pub list_ack: bool,

    /// Show acknowledged issues in the report instead of hiding them.
    #[arg(long = "show-ack")]
    pub show_ack: bool,

    /// Reason attached to an acknowledgement.
    #[arg(long, default_value = "")]
    pub reason: String,

    /// Acknowledgement category; fixes the default expiry.
    #[arg(long, value_enum, default_value = "wip")]
    pub category: AckCategory,

    /// Explicit acknowledgement expiry (ISO-8601), overriding the category default.
    #[arg(long, value_name = "ISO8601")]
    pub expires: Option<String>,
}
