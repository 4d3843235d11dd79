use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    broadcast::Broadcaster,
    cli::ServeArgs,
    enrichment::{DeviceLookup, NoLookup, SystemLookup},
    http,
    registry::Registry,
    tcp, websocket,
};

/// Shared state handed to every connection task.
pub struct HubContext {
    pub registry: Arc<Registry>,
    pub broadcaster: Broadcaster,
    pub lookup: Arc<dyn DeviceLookup>,
    pub shutdown: CancellationToken,
}

impl HubContext {
    pub fn new(lookup: Arc<dyn DeviceLookup>) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            lookup,
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubAddrs {
    pub tcp: SocketAddr,
    pub websocket: SocketAddr,
    pub http: SocketAddr,
}

/// The three bound listeners plus the state they share.
pub struct Hub {
    tcp: TcpListener,
    websocket: TcpListener,
    http: TcpListener,
    index: PathBuf,
    ctx: Arc<HubContext>,
}

impl Hub {
    /// Binds every listener up front so a busy port fails startup instead
    /// of surfacing later.
    pub async fn bind(args: &ServeArgs) -> Result<Self> {
        let lookup: Arc<dyn DeviceLookup> = if args.no_enrichment {
            Arc::new(NoLookup)
        } else {
            Arc::new(SystemLookup::default())
        };
        Self::bind_with_lookup(args, lookup).await
    }

    pub async fn bind_with_lookup(args: &ServeArgs, lookup: Arc<dyn DeviceLookup>) -> Result<Self> {
        let tcp = bind_listener("tcp chat", args.tcp_addr()).await?;
        let websocket = bind_listener("websocket", args.ws_addr()).await?;
        let http = bind_listener("http", args.http_addr()).await?;

        Ok(Self {
            tcp,
            websocket,
            http,
            index: args.index.clone(),
            ctx: Arc::new(HubContext::new(lookup)),
        })
    }

    pub fn local_addrs(&self) -> std::io::Result<HubAddrs> {
        Ok(HubAddrs {
            tcp: self.tcp.local_addr()?,
            websocket: self.websocket.local_addr()?,
            http: self.http.local_addr()?,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.ctx.registry)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Hub {
            tcp: tcp_listener,
            websocket: ws_listener,
            http: http_listener,
            index,
            ctx,
        } = self;
        let token = ctx.shutdown.clone();

        let tcp_server = tcp::serve(tcp_listener, Arc::clone(&ctx));
        let ws_server = {
            let token = token.clone();
            let app = websocket::router(Arc::clone(&ctx))
                .into_make_service_with_connect_info::<SocketAddr>();
            async move {
                axum::serve(ws_listener, app)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
                    .context("websocket server failed")
            }
        };
        let http_server = {
            let token = token.clone();
            async move {
                axum::serve(http_listener, http::router(index))
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
                    .context("http server failed")
            }
        };

        let servers = async move { tokio::try_join!(tcp_server, ws_server, http_server).map(|_| ()) };
        tokio::pin!(shutdown);
        tokio::pin!(servers);

        tokio::select! {
            _ = &mut shutdown => {
                info!("hub shutting down");
                token.cancel();
            }
            result = &mut servers => {
                token.cancel();
                return result;
            }
        }

        servers.await
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn bind_listener(name: &str, addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {name} listener on {addr} (is the port already in use?)"))
}

/// Address other machines on the LAN can reach this host at. Connecting a
/// UDP socket sends nothing; it only selects the outbound interface.
pub async fn lan_address() -> IpAddr {
    let probe = async {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(("8.8.8.8", 80)).await?;
        socket.local_addr()
    };
    match probe.await {
        Ok(addr) => addr.ip(),
        Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

/// Address to advertise for a listener: wildcard binds are replaced by the
/// LAN address.
pub fn display_addr(bound: SocketAddr, lan: IpAddr) -> SocketAddr {
    if bound.ip().is_unspecified() {
        SocketAddr::new(lan, bound.port())
    } else {
        bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_binds_advertise_lan_address() {
        let lan: IpAddr = "192.168.1.20".parse().expect("ip");
        assert_eq!(
            display_addr("0.0.0.0:8888".parse().expect("addr"), lan),
            "192.168.1.20:8888".parse::<SocketAddr>().expect("addr")
        );
        assert_eq!(
            display_addr("127.0.0.1:8765".parse().expect("addr"), lan),
            "127.0.0.1:8765".parse::<SocketAddr>().expect("addr")
        );
    }

    #[tokio::test]
    async fn busy_port_fails_bind_with_clear_message() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let args = ServeArgs {
            host: "127.0.0.1".parse().expect("ip"),
            tcp_port: occupied.local_addr().expect("addr").port(),
            ws_port: 0,
            http_port: 0,
            no_enrichment: true,
            ..ServeArgs::default()
        };

        let err = match Hub::bind(&args).await {
            Ok(_) => panic!("bind should fail on an occupied port"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("failed to bind tcp chat listener"));
    }

    #[tokio::test]
    async fn run_until_returns_after_shutdown() {
        let args = ServeArgs {
            host: "127.0.0.1".parse().expect("ip"),
            tcp_port: 0,
            ws_port: 0,
            http_port: 0,
            no_enrichment: true,
            ..ServeArgs::default()
        };
        let hub = Hub::bind(&args).await.expect("bind");
        let addrs = hub.local_addrs().expect("addrs");
        assert_ne!(addrs.tcp.port(), 0);

        tokio::time::timeout(std::time::Duration::from_secs(5), hub.run_until(async {}))
            .await
            .expect("hub stops promptly")
            .expect("clean shutdown");
    }
}
