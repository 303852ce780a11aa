use std::{error::Error, io, sync::Arc, time::Duration};

use clap::Parser;
use log::info;
use treestore_client::{
    Client, Endpoint, cli,
    protocol::{DEFAULT_HOST, DEFAULT_PORT},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TreeStore server host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    /// TreeStore server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Seconds to wait on each response read
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Cli::parse();
    let endpoint = Endpoint::new(args.host, args.port);
    info!("using server {endpoint}");

    let client = Arc::new(
        Client::with_endpoint(endpoint).with_read_timeout(Duration::from_secs(args.timeout)),
    );

    let handle = Arc::clone(&client);
    ctrlc::set_handler(move || {
        handle.close();
        std::process::exit(130);
    })?;

    let res = cli::repl(
        &client,
        io::stdin().lock(),
        io::stdout().lock(),
        io::stderr().lock(),
    );
    client.close();
    Ok(res?)
}
