use std::process::ExitCode;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use device_create::app::Provisioner;
use device_create::config::Cli;
use device_create::config::Config;
use device_create::node::HostFs;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

fn main() -> ExitCode {
    setup_global_hooks();

    let cli = Cli::parse();
    let config = Config::from(&cli);
    let _guard = utils::logging::init(&config.log_target);

    tracing::info!("Starting device-create {}", &**version::VERSION);

    match run(&config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config) -> Result<ExitCode> {
    let outcome = Provisioner::new(config)
        .run(HostFs)
        .map_err(|report| anyhow!("{report:?}"))
        .context("failed to provision NVIDIA device nodes")?;

    tracing::debug!(?outcome, "Run finished");
    Ok(outcome.exit_code())
}
