use clap::Parser;
use mimalloc::MiMalloc;

use twinpane_lib::cli::Cli;
use twinpane_lib::{Config, Controller};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("twinpane {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    twinpane_lib::logging::init(cli.debug);

    let config = match Config::load(cli.config_override()) {
        Ok(config) => config,
        Err(err) => {
            log::error!("failed to load config: {err}");
            Config::default()
        }
    };

    let mut controller = Controller::new(config, &cli);
    let exit_code = controller.run();

    if let Some(path) = &cli.printwd {
        if let Err(err) = controller.write_last_cwd(path) {
            log::warn!("failed to write --printwd file {}: {err}", path.display());
        }
    }

    std::process::exit(exit_code);
}
