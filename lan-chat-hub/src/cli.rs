use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the hub: TCP chat, WebSocket roster feed and the web page.
    Serve(ServeArgs),
    /// Connect to a hub over TCP and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Interface all three listeners bind to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port for line-oriented TCP chat clients. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = 8888)]
    pub tcp_port: u16,

    /// Port for WebSocket dashboards. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = 8765)]
    pub ws_port: u16,

    /// Port serving the web page. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = 8000)]
    pub http_port: u16,

    /// Page returned for every HTTP GET.
    #[arg(long, default_value = "index.html")]
    pub index: PathBuf,

    /// Skip hostname and MAC lookups for joining clients.
    #[arg(long)]
    pub no_enrichment: bool,
}

impl ServeArgs {
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tcp_port)
    }

    pub fn ws_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.ws_port)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.http_port)
    }
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: 8888,
            ws_port: 8765,
            http_port: 8000,
            index: PathBuf::from("index.html"),
            no_enrichment: false,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name shown next to every line you send.
    #[arg(long, value_parser = parse_username)]
    pub username: String,

    /// Address of the hub's TCP chat port.
    #[arg(long, default_value = "127.0.0.1:8888")]
    pub server: SocketAddr,
}

fn parse_username(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("username cannot be empty".to_string());
    }
    Ok(trimmed.to_string())
}
