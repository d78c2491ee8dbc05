use clap::Parser;
use regolo_cli::{describe, run, Cli};
use regolo_core::{config, telemetry};
use tokio::runtime::Runtime;

fn main() -> anyhow::Result<()> {
    config::load_dotenv();
    telemetry::init_tracing(telemetry::default_filter())?;

    let cli = Cli::parse();
    let runtime = Runtime::new()?;

    if let Err(err) = runtime.block_on(run(cli)) {
        tracing::debug!(error = ?err, "command failed");
        eprintln!("{}", describe(&err));
        std::process::exit(1);
    }

    Ok(())
}
