use clap::Parser;
use good_morning::{init_logging, run, Cli};
use log::info;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _handle = init_logging(cli.common.log_level.into(), "good_morning")?;
    let outcome = run(cli)?;
    info!("Finished: {outcome:?}");
    Ok(())
}
