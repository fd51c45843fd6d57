use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use libparticle_processor::config::Config;
use libparticle_processor::drivers::DRIVER_MAPPING;
use libparticle_processor::process::process;

mod progress_sink;
use progress_sink::ProgressSink;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

/// Log to the terminal and to a truncated log file in the working directory. Terminal
/// output goes around the progress bars of `pb_manager`.
fn init_logging(pb_manager: &MultiProgress) {
    let pattern = || {
        Box::new(spdlog::formatter::PatternFormatter::new(
            spdlog::formatter::pattern!(
                "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
            ),
        ))
    };
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./particle_processor.log"))
            .formatter(*pattern())
            .truncate(true)
            .build()
            .unwrap(),
    );
    let term_sink = Arc::new(ProgressSink::new(
        Arc::new(
            spdlog::sink::StdStreamSink::builder()
                .std_stream(spdlog::sink::StdStream::Stdout)
                .formatter(*pattern())
                .build()
                .unwrap(),
        ),
        pb_manager.clone(),
    ));
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .sink(term_sink)
            .build()
            .unwrap(),
    );
    spdlog::set_default_logger(logger);
}

fn main() {
    // Create a cli
    let matches = Command::new("particle_processor_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the file"),
        )
        .get_matches();

    let pb_manager = MultiProgress::new();
    init_logging(&pb_manager);

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        spdlog::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        spdlog::info!("Done.");
        return;
    }

    // Load our config
    spdlog::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    if config.debug {
        spdlog::default_logger().set_level_filter(spdlog::LevelFilter::MoreSevereEqual(
            spdlog::Level::Debug,
        ));
    }
    spdlog::info!("Config successfully loaded.");
    spdlog::info!(
        "Input: {} ({})",
        config.input_path.to_string_lossy(),
        config.input_driver
    );
    spdlog::info!(
        "Output: {} ({})",
        config.output_path.to_string_lossy(),
        config.output_driver
    );
    spdlog::info!("Species: {}", config.species);
    spdlog::debug!(
        "Known drivers: {}",
        DRIVER_MAPPING
            .iter()
            .map(|entry| entry.file_filter())
            .collect::<Vec<String>>()
            .join(", ")
    );

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    if let Ok(style) = ProgressStyle::with_template("{msg:30} [{bar:40.cyan/blue}] {pos:>3}%") {
        pb.set_style(style);
    }
    let (tx, rx) = mpsc::channel();
    // Spawn the task!
    let handle = std::thread::spawn(|| process(config, tx));

    loop {
        // No UI here, so poll the worker every so often
        std::thread::sleep(std::time::Duration::from_millis(250));
        while let Ok(status) = rx.try_recv() {
            pb.set_message(format!("{:?} {}", status.stage, status.dataset));
            pb.set_position((status.progress * 100.0) as u64);
        }

        if handle.is_finished() {
            match handle.join() {
                Ok(result) => match result {
                    Ok(_) => spdlog::info!("Successfully converted data!"),
                    Err(e) => spdlog::error!("Conversion failed with error: {e}"),
                },
                Err(_) => spdlog::error!("Failed to join conversion task!"),
            }
            break;
        }
    }

    pb.finish();

    spdlog::info!("Done.");
}
