mod cli;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    // `--threaded` ticks on the engine's own thread instead of this one
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--threaded" {
        cli::run_threaded()
    } else {
        cli::run_walkthrough()
    }
}
