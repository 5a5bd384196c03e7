//! Ledger overview (`status`) and failure reset (`retry`).
//!
//! Both commands only touch the ledger file. `retry` takes the run lock so
//! it can't race a running import.

use anyhow::Result;

use crate::config::Config;
use crate::ledger::{Ledger, RunLock};

const RECENT_FAILURES: usize = 10;

pub fn run_status(config: &Config, json: bool) -> Result<()> {
    let import = &config.import;
    let ledger = Ledger::load_or_create(&import.ledger_path)?;
    let summary = ledger.summary(import.max_attempts);

    if json {
        let failures: Vec<serde_json::Value> = ledger
            .failures()
            .into_iter()
            .map(|(id, f)| {
                serde_json::json!({
                    "id": id,
                    "source_path": f.source_path,
                    "stage": f.stage,
                    "message": f.message,
                    "attempts": f.attempts,
                    "last_attempt_at": f.last_attempt_at,
                })
            })
            .collect();
        let out = serde_json::json!({
            "summary": summary,
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("NyayaMitra import: ledger status");
    println!("================================");
    println!();
    println!("  Ledger:      {}", summary.path);
    println!("  Runs:        {}", summary.runs);
    println!("  Updated:     {}", summary.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
    println!("  Completed:   {}", summary.completed);
    println!("  Variables:   {}", summary.variables_total);
    println!(
        "  Failed:      {} ({} exhausted after {} attempts)",
        summary.failed, summary.exhausted, import.max_attempts
    );

    if !summary.failed_by_stage.is_empty() {
        println!();
        println!("  By stage:");
        for (stage, count) in &summary.failed_by_stage {
            println!("    {:<10} {:>6}", stage, count);
        }
    }

    let failures = ledger.failures();
    if !failures.is_empty() {
        println!();
        println!("  Recent failures:");
        println!(
            "  {:<8} {:>8}   {:<40} {}",
            "STAGE", "ATTEMPTS", "PATH", "ERROR"
        );
        println!("  {}", "-".repeat(76));
        for (_, f) in failures.iter().take(RECENT_FAILURES) {
            println!(
                "  {:<8} {:>8}   {:<40} {}",
                f.stage.to_string(),
                f.attempts,
                f.source_path,
                first_line(&f.message)
            );
        }
        if failures.len() > RECENT_FAILURES {
            println!("  ... and {} more", failures.len() - RECENT_FAILURES);
        }
    }

    Ok(())
}

/// Clear failure entries so the next `run` picks them up again.
pub fn run_retry(config: &Config, target: Option<&str>, all: bool) -> Result<()> {
    if target.is_none() && !all {
        anyhow::bail!("Specify a source path or template ID, or pass --all.");
    }
    let import = &config.import;
    let _lock = RunLock::acquire(&import.ledger_path, false)?;
    let mut ledger = Ledger::load_or_create(&import.ledger_path)?;

    let cleared = ledger.clear_failures(if all { None } else { target });
    if cleared == 0 {
        match target {
            Some(t) if !all => anyhow::bail!("No failure recorded for '{}'", t),
            _ => {
                println!("No failures to clear.");
                return Ok(());
            }
        }
    }

    ledger.save()?;
    println!("cleared {} failure(s); they will be retried on the next run", cleared);
    Ok(())
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}
