use ::anyhow::{Context, Result};
use ::std::net::SocketAddr;
use ::std::path::{Path, PathBuf};

use ::argh::FromArgs;

/// Input daemon subcommands
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum Subcommands {
    Server(ServerOpts),
    Client(ClientOpts),
    Watch(WatchOpts),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "server")]
/// Serve input events from local devices
pub(crate) struct ServerOpts {
    #[argh(option, short = 'b')]
    /// address to bind the RPC server to (overrides the config file)
    pub bind: Option<SocketAddr>,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "client")]
/// Connect to an input service and print its events
pub(crate) struct ClientOpts {
    #[argh(option, short = 'a')]
    /// address of the input service (overrides the config file)
    pub addr: Option<SocketAddr>,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "watch")]
/// Open local devices and print their events directly
pub(crate) struct WatchOpts {
    #[argh(option, short = 'n')]
    /// only open devices whose name contains this alias
    pub name: Option<String>,
}

#[derive(FromArgs, PartialEq, Debug)]
/// Input device event daemon
struct Opts {
    #[argh(option, short = 'c', default = "Path::new(\"/etc/inputd.conf\").into()")]
    /// path to the configuration file (default: /etc/inputd.conf)
    config: PathBuf,
    #[argh(subcommand)]
    subcommand: Subcommands,
}

mod bus;
mod client;
mod error;
mod evdev;
mod event;
mod manager;
mod server;
mod watch;
mod wire;

fn main() -> Result<()> {
    ::env_logger::init();
    let opts: Opts = argh::from_env();
    let cfg = load_config(&opts.config)?;
    let runtime = ::tokio::runtime::Runtime::new()?;
    use Subcommands::*;
    match opts.subcommand {
        Server(server) => runtime.block_on(server::run(cfg, server)),
        Client(client) => runtime.block_on(client::run(cfg, client)),
        Watch(watch) => runtime.block_on(watch::run(cfg, watch)),
    }
}

fn load_config(path: &Path) -> Result<::config::Config> {
    match ::std::fs::read_to_string(path) {
        Ok(text) => {
            ::toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
        }
        Err(err) if err.kind() == ::std::io::ErrorKind::NotFound => {
            Ok(::config::Config::default())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}
