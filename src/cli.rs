// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "thrumd",
    about = "Per-repository coordination daemon for multiple AI coding agents sharing a working tree",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Repository root (defaults to the current directory).
    #[arg(long, short = 'r', global = true)]
    pub repo: Option<PathBuf>,

    /// Path to an explicit config file, layered on top of auto-discovered ones.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon in the foreground.
    ///
    /// Acquires the repository lock, opens the event log and projection,
    /// binds the local control socket and the sync listener, and runs
    /// until interrupted. Only one daemon may hold the lock for a given
    /// repository at a time.
    Start,

    /// Ask a running daemon to shut down cleanly.
    Stop,

    /// Report whether a daemon is running for this repository, and basic
    /// identity/port information if so.
    Status,

    /// Pairing and peer management.
    Peer {
        #[command(subcommand)]
        command: PeerCommands,
    },

    /// Force an immediate sync pass against every known peer, bypassing
    /// the periodic safety-net interval.
    Sync,

    /// Print the effective configuration and exit.
    ShowConfig,

    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// `thrumd peer` subcommands.
#[derive(Subcommand, Debug)]
pub enum PeerCommands {
    /// Start a pairing session and print the code to share with the other side.
    ///
    /// The other daemon calls `thrumd peer join <address> <code>` with the
    /// address this daemon is listening on and the code printed here.
    Add,

    /// Complete a pairing session started with `thrumd peer add` on another
    /// daemon.
    Join {
        /// The other daemon's sync address, e.g. `127.0.0.1:42100`.
        address: String,
        /// The 4-digit code it printed.
        code: String,
    },

    /// List every paired peer and its last-known sync status.
    List,

    /// Remove a paired peer. It must re-pair to resume syncing.
    Remove {
        /// The peer's daemon id.
        daemon_id: String,
    },

    /// Show detailed sync status for one peer.
    Status {
        /// The peer's daemon id.
        daemon_id: String,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "thrumd", &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_parses_with_no_extra_args() {
        let cli = Cli::parse_from(["thrumd", "start"]);
        assert!(matches!(cli.command, Commands::Start));
    }

    #[test]
    fn peer_join_parses_address_and_code_positionally() {
        let cli = Cli::parse_from(["thrumd", "peer", "join", "127.0.0.1:42100", "4821"]);
        match cli.command {
            Commands::Peer {
                command: PeerCommands::Join { address, code },
            } => {
                assert_eq!(address, "127.0.0.1:42100");
                assert_eq!(code, "4821");
            }
            other => panic!("expected PeerCommands::Join, got {other:?}"),
        }
    }

    #[test]
    fn global_repo_flag_is_accepted_before_the_subcommand() {
        let cli = Cli::parse_from(["thrumd", "--repo", "/tmp/some-repo", "status"]);
        assert_eq!(cli.repo.as_deref(), Some(std::path::Path::new("/tmp/some-repo")));
    }

    #[test]
    fn missing_subcommand_is_a_parse_error() {
        assert!(Cli::try_parse_from(["thrumd"]).is_err());
    }

    #[test]
    fn command_factory_is_internally_consistent() {
        Cli::command().debug_assert();
    }
}
