use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use lan_chat_hub::{
    cli::{Cli, Command, ServeArgs},
    client,
    hub::{self, Hub},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let hub = Hub::bind(&args).await?;
    let addrs = hub.local_addrs()?;
    let lan = hub::lan_address().await;

    println!("tcp chat listening on {}", hub::display_addr(addrs.tcp, lan));
    println!("websocket listening on {}", hub::display_addr(addrs.websocket, lan));
    println!("web ui listening on http://{}", hub::display_addr(addrs.http, lan));
    info!(index = %args.index.display(), enrichment = !args.no_enrichment, "hub running; press ctrl-c to stop");

    if let Err(err) = hub.run_until_ctrl_c().await {
        warn!("hub exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
