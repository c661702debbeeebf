use std::env;
use std::fs;
use std::process;

use tracing_subscriber::EnvFilter;

use jcre::applets::{self, HELLO_AID, PURSE_AID};
use jcre::tear::{run_tear_campaign, CampaignConfig};
use jcre::{Aid, CardConfig, CardInstance};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "run" => {
                if args.len() < 4 {
                    print_usage();
                    process::exit(2);
                }
                run_script(&args[2], &args[3]);
                return;
            }
            "demo" => {
                run_demo();
                return;
            }
            "tear-test" => {
                let rounds = match args.get(2).map(|r| r.parse::<usize>()) {
                    None => CampaignConfig::default().rounds,
                    Some(Ok(rounds)) => rounds,
                    Some(Err(e)) => {
                        eprintln!("invalid round count: {}", e);
                        process::exit(2);
                    }
                };
                run_tear_test(rounds);
                return;
            }
            _ => {
                print_usage();
                return;
            }
        }
    }

    // Default: run the demo
    run_demo();
}

fn print_usage() {
    eprintln!("Usage: jcre [command]");
    eprintln!("Commands:");
    eprintln!("  run <config.json> <script> - Install configured applets and replay a script of hex APDUs");
    eprintln!("  demo                       - Hello-world and purse walkthrough on a default card");
    eprintln!("  tear-test [rounds]         - Randomised tear campaign against the purse");
    eprintln!("  (none)                     - Same as 'demo'");
    let catalog = applets::catalog();
    let classes: Vec<&str> = catalog.classes().collect();
    eprintln!("Applet classes for config files: {}", classes.join(", "));
}

/// Build a card with the sample applets at their default AIDs.
fn sample_card() -> CardInstance {
    let mut card = match CardInstance::new(CardConfig::default()) {
        Ok(card) => card,
        Err(e) => {
            eprintln!("default configuration rejected: {}", e);
            process::exit(1);
        }
    };
    let catalog = applets::catalog();
    for (class, aid) in [("hello", HELLO_AID), ("purse", PURSE_AID)] {
        let installed = aid
            .parse::<Aid>()
            .map_err(|e| e.to_string())
            .and_then(|aid| {
                card.install_from_catalog(&catalog, class, &aid, &[])
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = installed {
            eprintln!("failed to install {}: {}", class, e);
            process::exit(1);
        }
    }
    card
}

/// Replay a script: one hex APDU per line, `#` comments, `reset`.
fn run_script(config_path: &str, script_path: &str) {
    let config = match CardConfig::from_json_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    let script = match fs::read_to_string(script_path) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("failed to read {}: {}", script_path, e);
            process::exit(1);
        }
    };

    let mut card = match CardInstance::new(config) {
        Ok(card) => card,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    if let Err(e) = card.install_configured(&applets::catalog()) {
        eprintln!("install failed: {}", e);
        process::exit(1);
    }
    println!("ATR: {}", hex::encode_upper(card.atr()));

    for (number, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.eq_ignore_ascii_case("reset") {
            println!("ATR: {}", hex::encode_upper(card.reset()));
            continue;
        }
        let command: String = line.split_whitespace().collect();
        match hex::decode(&command) {
            Ok(apdu) => {
                let response = card.dispatch_apdu(&apdu);
                println!("=> {}", hex::encode_upper(&apdu));
                println!("<= {}", hex::encode_upper(&response));
            }
            Err(e) => {
                eprintln!("line {}: {}", number + 1, e);
                process::exit(1);
            }
        }
    }
}

fn exchange(card: &mut CardInstance, label: &str, apdu: &[u8]) -> Vec<u8> {
    let response = card.dispatch_apdu(apdu);
    println!("{:<24} => {}", label, hex::encode_upper(apdu));
    println!("{:<24} <= {}", "", hex::encode_upper(&response));
    response
}

fn select(aid: &str) -> Vec<u8> {
    let mut apdu = vec![0x00, 0xA4, 0x04, 0x00];
    let bytes = hex::decode(aid).unwrap_or_default();
    apdu.push(bytes.len() as u8);
    apdu.extend(bytes);
    apdu
}

fn run_demo() {
    let mut card = sample_card();
    println!("ATR: {}", hex::encode_upper(card.atr()));

    println!("--- hello world ---");
    exchange(&mut card, "select hello", &select(HELLO_AID));
    let response = exchange(&mut card, "hello", &[0x00, 0x01, 0x00, 0x00]);
    if let Some(text) = response.len().checked_sub(2).map(|n| &response[..n]) {
        println!("{:<24}    {:?}", "", String::from_utf8_lossy(text));
    }
    let mut echo = vec![0x00, 0x02, 0x00, 0x00];
    let message = b"Hello javacard world !";
    echo.push(message.len() as u8);
    echo.extend_from_slice(message);
    exchange(&mut card, "echo", &echo);

    println!("--- purse ---");
    exchange(&mut card, "select purse", &select(PURSE_AID));
    exchange(&mut card, "credit 100", &[0x00, 0x30, 0x00, 0x00, 0x02, 0x00, 0x64]);
    exchange(&mut card, "debit 30", &[0x00, 0x40, 0x00, 0x00, 0x02, 0x00, 0x1E]);
    exchange(&mut card, "balance", &[0x00, 0x50, 0x00, 0x00, 0x02]);
    card.arm_tear(1);
    exchange(&mut card, "credit 50 (torn)", &[0x00, 0x30, 0x00, 0x00, 0x02, 0x00, 0x32]);
    card.disarm_tear();
    exchange(&mut card, "balance", &[0x00, 0x50, 0x00, 0x00, 0x02]);

    println!("--- logical channels ---");
    exchange(&mut card, "open channel", &[0x00, 0x70, 0x00, 0x00, 0x01]);
    exchange(&mut card, "select hello on 1", &{
        let mut apdu = select(HELLO_AID);
        apdu[0] = 0x01;
        apdu
    });
}

fn run_tear_test(rounds: usize) {
    let mut card = sample_card();
    let purse: Aid = match PURSE_AID.parse() {
        Ok(aid) => aid,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    let config = CampaignConfig {
        rounds,
        ..CampaignConfig::default()
    };
    let report = run_tear_campaign(&mut card, &purse, &config);

    println!("rounds:    {}", report.rounds);
    println!("committed: {}", report.committed);
    println!("torn:      {}", report.torn);
    println!("rejected:  {}", report.rejected);
    println!(
        "balance:   {} (expected {})",
        report.observed_balance, report.expected_balance
    );

    if report.is_consistent() {
        println!("Balance invariant held.");
    } else {
        for violation in &report.violations {
            eprintln!("VIOLATION: {}", violation);
        }
        process::exit(1);
    }
}
