//! Interactive two-choice menu.

use dialoguer::{Confirm, Input};
use std::sync::Arc;

use detprep_core::{CommandConverter, HttpFetcher, Orchestrator, Outcome, PrepConfig};

const TOOL_REQUIREMENTS: [&str; 2] = [
    "pip install tf2onnx tensorflow",
    "npm install -g @tensorflow/tfjs-converter",
];

/// Returns `None` when the line asks to leave the menu.
fn menu_choice(line: &str) -> Option<&str> {
    match line.trim() {
        "" | "q" | "Q" | "quit" | "exit" => None,
        choice => Some(choice),
    }
}

fn print_menu() {
    println!();
    println!("  Detection model preparation");
    println!("  ===========================");
    println!("  1. Download and convert the source model");
    println!("  2. Create placeholder models");
    println!("  q. Quit");
    println!();
}

fn confirm_conversion() -> bool {
    println!("\n  This requires the following tools:");
    for requirement in TOOL_REQUIREMENTS {
        println!("    - {requirement}");
    }
    Confirm::new()
        .with_prompt("  Continue?")
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn report(outcome: &Outcome) {
    if outcome.is_success() {
        println!("\n  {}", outcome.message());
    } else {
        eprintln!("\n  {}", outcome.message());
    }
    if let Outcome::Synthesized(models) = outcome {
        for model in models {
            println!(
                "    {} ({} shard bytes, manifest declares {})",
                model.dir.display(),
                model.shard_bytes,
                model.manifest_bytes
            );
        }
    }
}

/// Run the menu until the user quits.
pub async fn run(config: PrepConfig) -> anyhow::Result<()> {
    let converter = Arc::new(CommandConverter::from_config(&config.conversion));
    let orchestrator = Orchestrator::new(config, Arc::new(HttpFetcher::new()), converter);

    loop {
        print_menu();
        let line: String = Input::new()
            .with_prompt("Choose (1/2)")
            .allow_empty(true)
            .interact_text()?;
        let Some(choice) = menu_choice(&line) else {
            break;
        };

        let outcome = orchestrator.handle_choice(choice, confirm_conversion).await;
        report(&outcome);
    }
    Ok(())
}
