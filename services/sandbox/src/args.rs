//! Command line accepted by the sandbox, as the supervisor invokes it

use clap::{Args, Parser, Subcommand};
use std::fmt;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "hearth-sandbox", version, about = "Reference Hearth sandbox")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the proxy dispatcher on the configured sockets
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// The config is a bincode `SandboxConfig`
    #[arg(long)]
    pub binary: bool,

    #[arg(long)]
    pub experimental: bool,

    /// `name=host:port` listen address, repeatable
    #[arg(long = "socket-addr")]
    pub socket_addr: Vec<NamedAddress>,

    /// `name=host:port` address of an external service, repeatable
    #[arg(long = "external-addr")]
    pub external_addr: Vec<NamedAddress>,

    /// Descriptor to write listen events to
    #[arg(long = "control-fd")]
    pub control_fd: Option<i32>,

    #[arg(long = "inspector-addr")]
    pub inspector_addr: Option<String>,

    #[arg(long)]
    pub verbose: bool,

    /// Config file, `-` for stdin
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedAddress {
    pub name: String,
    pub address: String,
}

impl FromStr for NamedAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, address)) if !name.is_empty() && !address.is_empty() => Ok(Self {
                name: name.to_string(),
                address: address.to_string(),
            }),
            _ => Err(format!("expected name=host:port, got {s:?}")),
        }
    }
}

impl fmt::Display for NamedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.address)
    }
}
