/*
Copyright 2022 Volker Schwaberow <volker@schwaberow.de>
Permission is hereby granted, free of charge, to any person obtaining a
copy of this software and associated documentation files (the
"Software"), to deal in the Software without restriction, including without
limitation the rights to use, copy, modify, merge, publish, distribute,
sublicense, and/or sell copies of the Software, and to permit persons to whom the
Software is furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be
included in all copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT
SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR
OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE,
ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
DEALINGS IN THE SOFTWARE.
Author(s): Volker Schwaberow
*/

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use log::{info, warn};
use rfuzzprobe::cli::Cli;
use rfuzzprobe::generalization::suspicious_count;
use rfuzzprobe::getstate::FuzzState;
use rfuzzprobe::pipeline::Pipeline;
use rfuzzprobe::report::Report;
use simple_logger::SimpleLogger;
use std::sync::atomic::Ordering;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    SimpleLogger::new()
        .with_level(cli.level_filter())
        .init()
        .context("Failed to initialise logger")?;

    if !confirm_authorization(&cli)? {
        return Ok(());
    }

    let pipeline = Pipeline::new(cli.to_config());

    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current depth level before stopping");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let (report, path) = pipeline.run_and_save(&cli.target).await?;
    info!("Report written to {}", path.display());

    if !cli.suppress_stats {
        display_summary(&report, &pipeline.state());
    }
    Ok(())
}

fn confirm_authorization(cli: &Cli) -> Result<bool> {
    println!("{}", "=".repeat(80).bright_red());
    println!(
        "{}",
        "WARNING: this tool sends malformed and hostile HTTP traffic"
            .bright_red()
            .bold()
    );
    println!("   Fuzzing can crash services and trigger security monitoring.");
    println!("   You MUST have explicit written authorization to test {}.", cli.target);
    println!("{}", "=".repeat(80).bright_red());

    if cli.skip_authorization_check {
        return Ok(true);
    }

    println!(
        "{}",
        "Do you have explicit written authorization to test this target? (yes/NO):"
            .bright_yellow()
    );
    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .context("Failed to read confirmation")?;

    if input.trim().to_lowercase() != "yes" {
        println!("{}", "Authorization not confirmed. Exiting for safety.".red());
        println!("   Use --i-have-authorization flag only if you have proper authorization.");
        return Ok(false);
    }
    Ok(true)
}

fn display_summary(report: &Report, state: &FuzzState) {
    println!();
    println!("{}", "Run Summary".bold());
    println!("================");
    println!("Target: {}", report.target.cyan());
    println!("Open ports: {:?}", report.open_ports);

    for entry in &report.ports {
        let findings = if entry.vulnerabilities.is_empty() {
            "none".green().to_string()
        } else {
            entry.vulnerabilities.join(", ").bright_red().to_string()
        };
        println!(
            "  {} {} | CVEs: {} | Vulnerabilities: {}",
            format!("{}", entry.port).bold(),
            entry.service,
            entry.cve_list.len(),
            findings
        );
        if let Some(fuzz) = &entry.fuzz {
            println!(
                "      Fuzzing: {:?} after {} round(s), {} anomalous case(s)",
                fuzz.state,
                fuzz.rounds,
                format!("{}", fuzz.anomaly_lengths.len()).yellow()
            );
        }
        if !entry.generalization.is_empty() {
            println!(
                "      Generalization: {} suspicious out of {}",
                format!("{}", suspicious_count(&entry.generalization)).red(),
                entry.generalization.len()
            );
        }
    }

    println!();
    println!(
        "{} trials sent. Started at {} / Ended at {}. {} ms. Normal: {}. Anomalies: {}. Exceptions: {}.",
        state.trials_sent(),
        state
            .start_time()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
        state
            .end_time()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
        state.duration_ms(),
        format!("{}", state.normal()).green(),
        format!("{}", state.anomalies()).yellow(),
        format!("{}", state.exceptions()).red()
    );
}
