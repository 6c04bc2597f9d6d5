mod cli;
mod logging;

use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    if let Err(err) = cli.run().await {
        eprintln!("courier error: {:#}", err);
        std::process::exit(1);
    }
}
