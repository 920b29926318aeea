//! ECP fit CLI - Run parameter searches from JSON configuration.

use std::fs;
use std::path::PathBuf;

use ecp_fit::{
    compute::{CostFunction, Evaluation, History, RoundOrchestrator},
    schema::{Candidate, FitConfig, PersistenceConfig},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [--dry-run] [--report]", args[0]);
        eprintln!();
        eprintln!("Run an ECP parameter search from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to fit configuration file");
        eprintln!("  --dry-run    Exercise the search loop without evaluating or writing files");
        eprintln!("  --report     Print the restored history sorted by cost and exit");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let dry_run = args[2..].iter().any(|a| a == "--dry-run");
    let report = args[2..].iter().any(|a| a == "--report");

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let mut config: FitConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    if report {
        print_report(&config);
        return;
    }

    // The evaluator is supplied by library users; the CLI only does bookkeeping.
    if !dry_run && !config.run.dry_run {
        eprintln!("No evaluator is built into the CLI, running in dry-run mode.");
    }
    config.run.dry_run = true;

    println!("ECP Fit");
    println!("=======");
    println!("Search: {}", config.search.name());
    println!("Components: {}", config.template.len());
    println!("Datasets: {}", config.dataset_count());
    println!("Evaluation budget: {}", config.run.max_evaluations);
    println!();

    let evaluator = |_: &Candidate, _: usize| Evaluation::Failed;
    let mut orchestrator = RoundOrchestrator::new(config, evaluator).unwrap_or_else(|e| {
        eprintln!("Error starting search: {}", e);
        std::process::exit(1);
    });

    for (dataset, source) in orchestrator.restore().iter().enumerate() {
        println!(
            "Dataset {}: {:?} ({} entries)",
            dataset,
            source,
            orchestrator.histories()[dataset].len()
        );
    }
    println!();

    println!("Running search...");
    let result = orchestrator
        .run_with_callback(|report| {
            println!(
                "  Round {}: {} candidates, best #{} cost={:.6} rank sum={}",
                report.round, report.batch_size, report.best_index, report.best.cost, report.best.rank
            );
        })
        .unwrap_or_else(|e| {
            eprintln!("Search aborted: {}", e);
            std::process::exit(1);
        });

    println!();
    println!("Stopped: {:?}", result.stop_reason);
    println!("Rounds: {}", result.rounds);
    println!("Evaluations: {}", result.evaluations);
    match &result.best {
        Some(best) => println!("Best: cost={:.6} values={:?}", best.cost, best.values()),
        None => println!("Best: none (no successful evaluation)"),
    }
    println!("Time: {:.2}s", result.elapsed_seconds);
}

fn print_report(config: &FitConfig) {
    let Some(persistence) = &config.persistence else {
        eprintln!("Reporting needs a persistence section in the configuration");
        std::process::exit(1);
    };

    let cost = CostFunction::new(&config.cost);
    for dataset in 0..config.dataset_count() {
        let (history, source) = History::restore(
            dataset,
            &persistence.checkpoint_path(dataset),
            &persistence.log_path(dataset),
            &persistence.regions_path(),
            &cost,
        );

        println!(
            "Dataset {} ({:?}, {} entries)",
            dataset,
            source,
            history.len()
        );
        println!("{:>8}  {:>14}  {:>5}  values", "index", "cost", "rank");
        for entry in history.reportable(true) {
            let index = entry
                .sequence_index
                .map_or_else(|| "-".to_string(), |i| i.to_string());
            println!(
                "{:>8}  {:>14.6}  {:>5}  {:?}",
                index,
                entry.cost,
                entry.rank,
                entry.values()
            );
        }
        println!();
    }
}

fn print_example_config() {
    let config = FitConfig {
        persistence: Some(PersistenceConfig::default()),
        ..Default::default()
    };

    let json = serde_json::to_string_pretty(&config).unwrap_or_else(|e| {
        eprintln!("Error serializing example config: {}", e);
        std::process::exit(1);
    });
    println!("{}", json);
}
