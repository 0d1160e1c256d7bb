//! Print the placement of the current aprun job
//!
//! Run inside an allocation with: aprun -n 4 ./placement_report [--json]

use alpsinfo::{query_placement_in, ReaderConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let json = std::env::args().any(|arg| arg == "--json");
    let config = ReaderConfig::from_env();

    let snapshot = match query_placement_in(&config) {
        Ok(snapshot) => snapshot,
        Err(e) if e.is_no_job_context() => {
            eprintln!("Not running under aprun (${} is not set)", config.app_id_var);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        match snapshot.to_json() {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        snapshot.print_summary();
    }
}
