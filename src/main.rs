mod agent;
mod catalog;
mod config;
mod desktop;
mod exec;
mod lock;
mod logger;
mod notify;
mod packages;
mod privileges;
mod reconcile;
mod store;
mod supervisor;
mod toggle;
mod update;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use config::Config;
use store::StoreCommand;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str());

    match command {
        None | Some("help") | Some("-h") | Some("--help") => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Some(
            "agent" | "update" | "reconcile" | "rebrand" | "detect" | "store" | "supervise",
        ) => {}
        Some(other) => {
            eprintln!("❌ Unknown command: {}", other);
            print_help();
            return ExitCode::from(2);
        }
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logger::init_logger(&config, privileges::is_root()) {
        eprintln!("❌ {}", e);
        return ExitCode::FAILURE;
    }

    match command {
        Some("agent") => run_and_report(agent::run_agent(&config).map(|o| o.exit_code())),
        Some("update") => run_and_report(agent::run_update(&config).map(|o| o.exit_code())),
        Some("reconcile") => run_and_report(agent::run_reconcile(&config).map(|_| 0)),
        Some("rebrand") => run_and_report(agent::run_rebrand(&config).map(|_| 0)),
        Some("detect") => run_and_report(agent::run_detect(&config).map(|_| 0)),
        Some("store") => match StoreCommand::parse(&args[2..]) {
            Some(cmd) => run_and_report(store::run_store(&config, &cmd)),
            None => {
                eprintln!("❌ Usage: guadamint store list | install <id> | remove <id>");
                ExitCode::from(2)
            }
        },
        Some("supervise") => supervise(&config, &args[2..]),
        _ => ExitCode::from(2),
    }
}

fn run_and_report(result: std::io::Result<i32>) -> ExitCode {
    match result {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("❌ {}", err);
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

fn supervise(config: &Config, args: &[String]) -> ExitCode {
    if args.is_empty() {
        eprintln!("❌ Usage: guadamint supervise <command...>");
        return ExitCode::from(2);
    }

    let program = match env::current_exe() {
        Ok(path) => path,
        Err(_) => PathBuf::from("guadamint"),
    };

    exit_code(supervisor::supervise(
        &program,
        args,
        config.restart_delay(),
        config.supervisor.max_restarts,
    ))
}

fn print_help() {
    println!("Usage: guadamint <command>");
    println!("Commands:");
    println!("  agent               - Run one maintenance pass (update, packages, branding)");
    println!("  update              - Synchronize with the GuadaMint repository");
    println!("  reconcile           - Install missing required packages");
    println!("  rebrand             - Set the GuadaMint menu icon for every user");
    println!("  detect              - Detect the desktop and greet the user");
    println!("  store list          - Show the catalog with installed state");
    println!("  store install <id>  - Install a catalog entry");
    println!("  store remove <id>   - Remove a catalog entry");
    println!("  supervise <cmd...>  - Run a command, relaunching it after self-updates");
    println!("  help                - Show this help message");
}
