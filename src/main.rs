use anyhow::Context;
use edgeserve::Server;
use edgeserve::config::Config;

fn main() -> anyhow::Result<()> {
    let mut cfg = Config::load().context("loading configuration")?;

    let mut args = std::env::args().skip(1);
    if let Some(host) = args.next() {
        cfg.server.host = host;
    }
    if let Some(port) = args.next() {
        cfg.server.port = port;
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.logging.max_level()?)
        .init();

    let server = Server::new(cfg.server).context("creating server")?;
    server.listen().context("starting listener")?;

    server.run().context("event loop failed")?;

    tracing::info!("Server stopped");
    Ok(())
}
