use anyhow::Context;
use clap::Parser;
use log::info;

use retina::{app::App, cli::Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.to_lowercase();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let app = App::from_cli(&cli).context("invalid arguments")?;
    info!(
        "{} classes, {} dataset, {} activation",
        app.data.classification, app.data.dataset, app.activation
    );

    let outcome = app.run().context("retina run failed")?;
    if let Some(best) = outcome.history.as_ref().and_then(|history| history.best()) {
        info!("best epoch {} with loss {:.4}", best.epoch, best.monitored_loss());
    }
    info!("prediction written to {}", outcome.prediction.display());

    Ok(())
}
