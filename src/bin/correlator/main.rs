use anyhow::Result;
use correlator::harness::ModuleRunner;
use correlator::module::client::Client;
use correlator::module::confirms::Confirms;
use correlator::module::demo::Demo;
use correlator::module::server::Server;
use options::{Command, LogFormat};
use structopt::StructOpt;
use tracing::info;

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let (command, runner) = init();

    let termination_reason = match command {
        Command::Server(options) => runner.run(Server::new(options)).await,
        Command::Client(options) => runner.run(Client::new(options)).await,
        Command::Confirms(options) => runner.run(Confirms::new(options)).await,
        Command::Demo(options) => runner.run(Demo::new(options)).await,
    };

    if termination_reason.is_success() {
        Ok(())
    } else {
        Err(termination_reason.into())
    }
}

fn init() -> (options::Command, ModuleRunner) {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("Correlator {}", env!("CARGO_PKG_VERSION"));

    (options.command, ModuleRunner::default())
}
