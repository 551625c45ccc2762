use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use fsagent::args::Args;
use fsagent::config::load_config_with_source;
use fsagent::logging::init_logging;
use fsagent::runtime::{RuntimeConfig, shutdown_signal};
use fsagent::Agent;

fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, source) = load_config_with_source(&args.config_path())?;
    args.apply(&mut config);

    if args.check_config {
        println!(
            "Configuration OK: {} instance(s) from {}",
            config.instances.len(),
            source.description()
        );
        return Ok(());
    }

    let _log_guard = init_logging(&config.logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        source = source.description(),
        instances = config.instances.len(),
        "Starting fsagent"
    );

    let runtime = RuntimeConfig::from_args(args.threads);
    info!(worker_threads = runtime.worker_threads(), "Building runtime");
    let rt = runtime.build_runtime()?;

    let result = rt.block_on(Agent::new(config).run(shutdown_signal()));
    if let Err(e) = &result {
        error!(error = format!("{e:#}"), "fsagent exited with error");
    }
    result
}
