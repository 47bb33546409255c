use anyhow::Result;
use clap::Parser;
use mailgate::cli::{Cli, CliHandler};
use mailgate::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.debug);

    let handler = CliHandler::new(cli.config_dir, &cli.site_url, &cli.site_name)?;
    handler.handle_command(cli.command).await
}
