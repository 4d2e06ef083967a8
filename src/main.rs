//! KIV/ZOS-style pseudoFAT manipulation: `read` checks and caches an image,
//! `defrag` additionally relocates clusters until every file is contiguous,
//! `create` builds a fresh image and drops into an interactive session for
//! populating it. See `lib.rs` for the core data model, checker, cache, and
//! defragmenter.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{App, Arg, SubCommand};
use log::{info, LevelFilter};
use rand::thread_rng;

use pseudofat::cache::Cache;
use pseudofat::checker::{self, CheckOptions};
use pseudofat::codec;
use pseudofat::config::CreateConfig;
use pseudofat::defrag;
use pseudofat::dump;
use pseudofat::error::{self, Error};
use pseudofat::image::{BootRecord, FatTables, Image, FILE_END};
use pseudofat::inject;

const DEFAULT_INPUT_FILE: &str = "output.fat";
const DEFAULT_OUTPUT_FILE: &str = "output.out.fat";

/// Exit codes shared by every mode, per the external interface contract.
mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const LOAD_FAILURE: i32 = 1;
    pub const CHECK_FAILURE: i32 = 2;
    pub const DEFRAG_FAILURE: i32 = 3;
    pub const WRITE_FAILURE: i32 = 4;
    pub const MODE_NOT_SPECIFIED: i32 = 5;
}

fn main() {
    let matches = build_cli().get_matches();

    let verbosity = matches.occurrences_of("verbose");
    init_logging(verbosity);

    let code = match matches.subcommand() {
        ("read", Some(sub)) => read_mode(sub),
        ("defrag", Some(sub)) => defrag_mode(sub),
        ("create", Some(sub)) => create_mode(sub),
        _ => {
            eprintln!("Mode not specified. Please choose one of: read, defrag, create (see --help).");
            exit_code::MODE_NOT_SPECIFIED
        }
    };

    std::process::exit(code);
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(level).init();
}

fn build_cli() -> App<'static, 'static> {
    let input_arg = Arg::with_name("input")
        .short("i")
        .long("input")
        .takes_value(true)
        .default_value(DEFAULT_INPUT_FILE)
        .help("Path to the pseudoFAT image to load");
    let output_arg = Arg::with_name("output")
        .short("o")
        .long("output")
        .takes_value(true)
        .default_value(DEFAULT_OUTPUT_FILE)
        .help("Path to write the resulting pseudoFAT image to");
    let threads_arg = Arg::with_name("threads")
        .short("t")
        .long("threads")
        .takes_value(true)
        .default_value("1")
        .help("Number of defragmentation worker threads, 1-16 (out-of-range falls back to 1)");
    let force_arg = Arg::with_name("force")
        .short("f")
        .long("force-accept-recoverable-errors")
        .help("Proceed past the recoverable-divergence budget instead of failing");
    let match_badblocks_arg = Arg::with_name("match-badblocks")
        .short("m")
        .long("enable-badblock-matching")
        .help("Reconcile FAT copies that disagree on a live chain when one side is BAD");
    let dry_run_arg = Arg::with_name("dry-run").short("w").long("dry-run").help("Compute but do not write the result back to disk");
    let dump_arg = Arg::with_name("dump").short("d").long("dump").help("Print an ASCII cluster map at the end");

    App::new("pseudofat")
        .about("Creates, checks, and defragments pseudoFAT disk images")
        .arg(Arg::with_name("verbose").short("v").long("verbose").multiple(true).help("Increase log verbosity (-v, -vv)"))
        .subcommand(
            SubCommand::with_name("read")
                .about("Load an image and verify FAT consistency")
                .arg(input_arg.clone())
                .arg(force_arg.clone())
                .arg(match_badblocks_arg.clone())
                .arg(dump_arg.clone()),
        )
        .subcommand(
            SubCommand::with_name("defrag")
                .about("Load, check, defragment, and write back an image")
                .arg(input_arg.clone())
                .arg(output_arg.clone())
                .arg(threads_arg)
                .arg(force_arg)
                .arg(match_badblocks_arg)
                .arg(dry_run_arg)
                .arg(dump_arg),
        )
        .subcommand(
            SubCommand::with_name("create")
                .about("Build a fresh image and enter an interactive session to populate it")
                .arg(output_arg)
                .arg(Arg::with_name("config").long("config").takes_value(true).help("Optional TOML file with create-mode parameters"))
                .arg(Arg::with_name("cluster-count").long("cluster-count").takes_value(true).help("Total physical cluster count"))
                .arg(Arg::with_name("cluster-size").long("cluster-size").takes_value(true).help("Bytes per cluster (default 512)"))
                .arg(Arg::with_name("fat-type").long("fat-type").takes_value(true).help("12, 16, or 32 (cosmetic only, default 12)"))
                .arg(Arg::with_name("fat-copies").long("fat-copies").takes_value(true).help("Number of redundant FAT tables (default 2)"))
                .arg(Arg::with_name("volume-descriptor").long("volume-descriptor").takes_value(true).help("Volume descriptor text"))
                .arg(Arg::with_name("reserved-clusters").long("reserved-clusters").takes_value(true).help("Clusters reserved from allocation"))
                .arg(Arg::with_name("signature").long("signature").takes_value(true).help("\"OK\" or \"NOK\"")),
        )
}

/// Attaches `context` to `err` and prints the resulting chain, the way the
/// library's own I/O boundary (`codec.rs`) is consumed from a caller that
/// wants file paths and operation names attached before the user sees them.
fn report_failure(err: impl std::error::Error + Send + Sync + 'static, context: String) {
    let wrapped = anyhow::Error::new(err).context(context);
    eprintln!("Error: {:?}", wrapped);
}

fn check_options_from(matches: &clap::ArgMatches) -> CheckOptions {
    CheckOptions { match_badblocks: matches.is_present("match-badblocks"), force_not_consistent: matches.is_present("force") }
}

fn read_mode(matches: &clap::ArgMatches) -> i32 {
    let path = matches.value_of("input").unwrap();

    let (_file, mut image) = match codec::load_image(path) {
        Ok(loaded) => loaded,
        Err(err) => {
            report_failure(err, format!("loading pseudoFAT image from '{}'", path));
            return exit_code::LOAD_FAILURE;
        }
    };

    println!("Filesystem successfully loaded, proceeding with checks");

    if let Err(err) = checker::check(&mut image, check_options_from(matches)) {
        report_failure(err, "checking FAT consistency".to_string());
        return exit_code::CHECK_FAILURE;
    }

    info!("caching data for future use");
    let _cache = Cache::build(&image);

    println!("Filesystem is OK");

    if matches.is_present("dump") {
        print!("{}", dump::dump(&image));
    }

    exit_code::SUCCESS
}

fn defrag_mode(matches: &clap::ArgMatches) -> i32 {
    let input = matches.value_of("input").unwrap();
    let output = matches.value_of("output").unwrap();
    let dry_run = matches.is_present("dry-run");

    let worker_count = matches
        .value_of("threads")
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&count| (1..=16).contains(&count))
        .unwrap_or_else(|| {
            eprintln!("Invalid thread count, falling back to 1 thread");
            1
        });

    let (_file, mut image) = match codec::load_image(input) {
        Ok(loaded) => loaded,
        Err(err) => {
            report_failure(err, format!("loading pseudoFAT image from '{}'", input));
            return exit_code::LOAD_FAILURE;
        }
    };

    println!("Filesystem successfully loaded, proceeding with checks");

    if let Err(err) = checker::check(&mut image, check_options_from(matches)) {
        report_failure(err, "checking FAT consistency".to_string());
        return exit_code::CHECK_FAILURE;
    }

    let cache = Cache::build(&image);
    println!("All OK, ready to proceed with defragmentation");

    if dry_run {
        info!("dry run requested, skipping defragmentation and write-back");
        if matches.is_present("dump") {
            print!("{}", dump::dump(&image));
        }
        return exit_code::SUCCESS;
    }

    let image = match defrag::defragment(image, &cache, worker_count) {
        Ok(image) => image,
        Err(err) => {
            report_failure(err, "defragmenting image".to_string());
            return exit_code::DEFRAG_FAILURE;
        }
    };

    if let Err(err) = codec::save_image(output, &image) {
        report_failure(err, format!("writing pseudoFAT image to '{}'", output));
        return exit_code::WRITE_FAILURE;
    }

    if matches.is_present("dump") {
        print!("{}", dump::dump(&image));
    }

    exit_code::SUCCESS
}

fn create_mode(matches: &clap::ArgMatches) -> i32 {
    let output = matches.value_of("output").unwrap().to_string();

    let config = match build_create_config(matches) {
        Ok(config) => config,
        Err(err) => {
            report_failure(err, "building create-mode configuration".to_string());
            return exit_code::LOAD_FAILURE;
        }
    };

    let boot_record = BootRecord::new(
        &config.volume_descriptor,
        config.fat_type,
        config.fat_copies,
        config.cluster_size,
        config.cluster_count,
        config.reserved_cluster_count,
        &config.signature,
    );
    let fat = FatTables::new_unused(config.fat_copies as usize, config.cluster_count as usize);
    let real_cluster_count = boot_record.real_cluster_count() as usize;
    let clusters = vec![vec![0u8; config.cluster_size as usize]; real_cluster_count];
    let image = Image::new(boot_record, fat, Vec::new(), clusters);

    println!("\nRequested filesystem successfully created");
    println!("Awaiting commands. Type 'help' for list of available commands\n");

    run_create_repl(image, &output);
    exit_code::SUCCESS
}

fn build_create_config(matches: &clap::ArgMatches) -> error::Result<CreateConfig> {
    let mut config = match matches.value_of("config") {
        Some(path) => CreateConfig::from_toml_file(path)?,
        None => CreateConfig::default(),
    };

    if let Some(v) = matches.value_of("cluster-count").and_then(|s| s.parse().ok()) {
        config.cluster_count = v;
    }
    if let Some(v) = matches.value_of("cluster-size").and_then(|s| s.parse().ok()) {
        config.cluster_size = v;
    }
    if let Some(v) = matches.value_of("fat-type").and_then(|s| s.parse().ok()) {
        config.fat_type = v;
    }
    if let Some(v) = matches.value_of("fat-copies").and_then(|s| s.parse().ok()) {
        config.fat_copies = v;
    }
    if let Some(v) = matches.value_of("volume-descriptor") {
        config.volume_descriptor = v.to_string();
    }
    if let Some(v) = matches.value_of("reserved-clusters").and_then(|s| s.parse().ok()) {
        config.reserved_cluster_count = v;
    }
    if let Some(v) = matches.value_of("signature") {
        config.signature = v.to_string();
    }

    config.validate()?;
    Ok(config)
}

/// Interactive loop for populating a freshly created image, mirroring the
/// original tool's `create_mode` command set.
fn run_create_repl(mut image: Image, output: &str) {
    let mut rng = thread_rng();
    let mut loaded_path: Option<PathBuf> = None;
    let mut loaded_bytes: Vec<u8> = Vec::new();
    let mut randomize_entry = false;
    let mut file_ender: u32 = FILE_END;
    let mut saved = false;

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut command = String::new();
        if io::stdin().read_line(&mut command).unwrap_or(0) == 0 {
            break;
        }
        let command = command.trim();

        if command == "help" {
            println!("List of available commands:");
            println!("  help          - prints this output");
            println!("  load <file>   - loads a file to be put into the filesystem");
            println!("  put [n]       - puts the loaded file into the filesystem n times (default 1)");
            println!("  random on/off - turns randomizing cluster placement on/off");
            println!("  fileend [val] - sets the file-ending sentinel (default resets to FILE_END)");
            println!("  save          - saves the filesystem image to the output file");
            println!("  exit / quit   - exits the program");
        } else if let Some(rest) = command.strip_prefix("random") {
            match rest.trim() {
                "on" => {
                    randomize_entry = true;
                    println!("Randomizing entries turned ON");
                }
                "off" => {
                    randomize_entry = false;
                    println!("Randomizing entries turned OFF");
                }
                "" => eprintln!("Please specify randomness mode - on / off"),
                other => eprintln!("Unknown randomness mode '{}', use on / off", other),
            }
        } else if let Some(rest) = command.strip_prefix("fileend") {
            let rest = rest.trim();
            if rest.is_empty() {
                println!("Resetting file ending value back to FILE_END");
                file_ender = FILE_END;
            } else {
                match rest.parse() {
                    Ok(value) => file_ender = value,
                    Err(_) => eprintln!("'{}' is not a valid cluster value", rest),
                }
            }
        } else if let Some(rest) = command.strip_prefix("load") {
            let path = rest.trim();
            if path.is_empty() {
                eprintln!("Please specify a valid filename in the load command");
            } else {
                match std::fs::read(path) {
                    Ok(bytes) => {
                        loaded_bytes = bytes;
                        loaded_path = Some(PathBuf::from(path));
                        println!("Loaded file {}", path);
                    }
                    Err(err) => eprintln!("File {} could not be loaded: {}", path, err),
                }
            }
        } else if let Some(rest) = command.strip_prefix("put") {
            match &loaded_path {
                None => eprintln!("At first, you must load a valid file with 'load' command"),
                Some(path) => {
                    let count: usize = rest.trim().parse().unwrap_or(1).max(1);
                    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();
                    for _ in 0..count {
                        let result = inject::write_source_file(
                            &mut image,
                            &filename,
                            &loaded_bytes,
                            0,
                            randomize_entry,
                            0,
                            file_ender,
                            &mut rng,
                        );
                        match result {
                            Ok(()) => println!("Successfully written file by specified rules"),
                            Err(Error::InsufficientFreeSpace { .. }) => {
                                println!("No space left on (pseudo)device");
                                break;
                            }
                            Err(err) => {
                                eprintln!("Error: {}", err);
                                break;
                            }
                        }
                    }
                }
            }
        } else if command == "save" {
            println!("Saving image to file {}...", output);
            match codec::save_image(output, &image) {
                Ok(()) => {
                    saved = true;
                    println!("OK");
                }
                Err(err) => eprintln!("Could not save image to file: {}", err),
            }
        } else if command == "exit" || command == "quit" {
            if !saved {
                print!("Unsaved changes will be lost. Proceed? Y/N ");
                let _ = io::stdout().flush();
                let mut confirm = String::new();
                io::stdin().read_line(&mut confirm).ok();
                if matches!(confirm.trim(), "Y" | "y") {
                    break;
                }
            } else {
                break;
            }
        } else if !command.is_empty() {
            eprintln!("Unknown command '{}'. Type 'help' for a list of commands.", command);
        }
    }
}
