use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Import proxy share links, rank servers by latency and emit outbound configs",
    long_about = None
)]
pub struct Args {
    #[arg(short, long, global = true, help = "Settings file, accept file path or URL")]
    pub settings: Option<String>,

    #[arg(short, long, global = true, help = "Emit debug log")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print the normalized record for a share link
    Parse { link: String },

    /// Print the canonical share link
    Link { link: String },

    /// Emit the outbound document for a share link or a stored server
    Config {
        #[arg(help = "Share link, or id or name of a stored server")]
        target: String,

        #[arg(short, long, help = "Write to this path instead of stdout")]
        output: Option<String>,
    },

    /// Import links from a file or URL, or refresh all configured subscriptions
    Import { source: Option<String> },

    /// Probe stored servers and print the ranking
    Rank {
        #[arg(long, help = "Pick the server to use interactively")]
        select: bool,
    },

    /// Measure the latency of one endpoint
    Ping {
        host: String,
        port: u16,

        #[arg(long, help = "Hard timeout in milliseconds")]
        timeout_ms: Option<u64>,
    },

    /// List supported protocols
    Protocols,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rank_with_global_flags() {
        let args = Args::try_parse_from(["waypoint", "rank", "--select", "-v", "-s", "w.toml"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.settings.as_deref(), Some("w.toml"));
        assert_eq!(args.command, Command::Rank { select: true });
    }

    #[test]
    fn test_parse_ping() {
        let args = Args::try_parse_from(["waypoint", "ping", "1.1.1.1", "443", "--timeout-ms", "800"])
            .unwrap();
        assert_eq!(
            args.command,
            Command::Ping {
                host: "1.1.1.1".to_string(),
                port: 443,
                timeout_ms: Some(800),
            }
        );
    }

    #[test]
    fn test_import_source_is_optional() {
        let args = Args::try_parse_from(["waypoint", "import"]).unwrap();
        assert_eq!(args.command, Command::Import { source: None });
    }

    #[test]
    fn test_command_is_required() {
        assert!(Args::try_parse_from(["waypoint"]).is_err());
    }
}
