use clap::{Arg, ArgAction, Command, value_parser};
use clap_num::maybe_hex;
use log::{debug, error};
use ntfs_mft::Mft;
use ntfs_mft::dir::{DirectoryItem, DirectoryTree};

fn main() {
    let matches = Command::new("ntfs_mft")
        .version("0.1.0")
        .about("Decode an extracted $MFT and rebuild the volume directory tree.")
        .arg(
            Arg::new("mft")
                .short('m')
                .long("mft")
                .value_parser(value_parser!(String))
                .required(true)
                .help("Path to the $MFT dump to decode."),
        )
        .arg(
            Arg::new("entry")
                .short('e')
                .long("entry")
                .value_parser(maybe_hex::<u64>)
                .help("Display the metadata of a specific entry number (decimal or hex)."),
        )
        .arg(
            Arg::new("tree")
                .short('t')
                .long("tree")
                .action(ArgAction::SetTrue)
                .help("Print the reconstructed directory tree."),
        )
        .arg(
            Arg::new("summary")
                .short('s')
                .long("summary")
                .action(ArgAction::SetTrue)
                .help("Print the live/free/bad/uninitialized partition summary."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output the requested structures in JSON format."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    // Initialize logger.
    let log_level_str = matches.get_one::<String>("log_level").unwrap();
    let level_filter = match log_level_str.as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    let mft_path = matches.get_one::<String>("mft").unwrap();
    let show_summary = matches.get_flag("summary");
    let show_tree = matches.get_flag("tree");
    let json_output = matches.get_flag("json");
    let entry = matches.get_one::<u64>("entry").copied();

    let buffer = match std::fs::read(mft_path) {
        Ok(data) => data,
        Err(e) => {
            error!("Could not read '{}': {}", mft_path, e);
            return;
        }
    };
    debug!("Read {} bytes from '{}'", buffer.len(), mft_path);

    let mft = match Mft::from_buffer(&buffer) {
        Ok(mft) => mft,
        Err(e) => {
            error!("Couldn't decode the MFT: {}", e);
            return;
        }
    };

    if show_summary {
        if json_output {
            match serde_json::to_string_pretty(&mft.to_json()) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing summary to JSON: {}", e),
            }
        } else {
            println!("{}", mft.to_string());
        }
    }

    if let Some(entry_number) = entry {
        match mft.record_by_number(entry_number) {
            Some(record) => {
                if json_output {
                    println!("{}", record.to_json());
                } else {
                    println!("{}", record.to_string());
                    if let Some(path) = mft.full_path(&record.key()) {
                        println!("Path: /{}", path);
                    }
                }
            }
            None => error!("No live or free record with entry number {}", entry_number),
        }
    }

    if show_tree {
        if json_output {
            match serde_json::to_string_pretty(&mft.directory) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing tree to JSON: {}", e),
            }
        } else {
            print_tree(&mft.directory, mft.directory.root(), 0);
        }
    }
}

fn print_tree(tree: &DirectoryTree, item: &DirectoryItem, depth: usize) {
    if depth == 0 {
        println!("/");
    } else {
        println!("{}{}", "  ".repeat(depth), item.name);
    }
    for &child in item.children.values() {
        if let Some(node) = tree.node(child) {
            print_tree(tree, node, depth + 1);
        }
    }
}
