mod app;
mod demo;

pub use app::App;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let trials = std::env::args()
        .nth(1)
        .map(|n| n.parse::<u32>())
        .transpose()?
        .unwrap_or(demo::DEFAULT_TRIALS);

    let app = App::new(trials)?;
    app.run()?;

    Ok(())
}
