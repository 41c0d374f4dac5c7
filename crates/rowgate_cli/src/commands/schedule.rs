//! Schedule command implementation.

use rowgate_core::RetryConfig;
use serde::Serialize;

/// One attempt as printed.
#[derive(Debug, Serialize)]
pub struct AttemptRow {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Sleep before the attempt, in milliseconds.
    pub pre_delay_ms: u128,
    /// Attempt timeout, in milliseconds.
    pub timeout_ms: u128,
    /// Latest time the attempt can end, from the start of the operation.
    pub deadline_ms: u128,
}

/// Schedule summary.
#[derive(Debug, Serialize)]
pub struct ScheduleReport {
    /// Attempts in order.
    pub attempts: Vec<AttemptRow>,
    /// Upper bound on time before a terminal timeout.
    pub worst_case_ms: u128,
}

/// Parses `timeout:delay` pairs such as `200:0,400:400`.
pub fn parse_schedule(text: &str) -> Result<RetryConfig, Box<dyn std::error::Error>> {
    let slots = text
        .split(',')
        .map(|slot| -> Result<(u64, u64), Box<dyn std::error::Error>> {
            let (timeout, delay) = slot
                .trim()
                .split_once(':')
                .ok_or_else(|| format!("expected timeout_ms:delay_ms, got {slot:?}"))?;
            Ok((timeout.trim().parse::<u64>()?, delay.trim().parse::<u64>()?))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RetryConfig::from_millis(&slots)?)
}

/// Describes a schedule.
pub fn report(config: &RetryConfig) -> ScheduleReport {
    let mut elapsed = 0u128;
    let attempts = config
        .attempts()
        .iter()
        .map(|a| {
            elapsed += a.pre_delay.as_millis() + a.timeout.as_millis();
            AttemptRow {
                attempt: a.index + 1,
                pre_delay_ms: a.pre_delay.as_millis(),
                timeout_ms: a.timeout.as_millis(),
                deadline_ms: elapsed,
            }
        })
        .collect();
    ScheduleReport {
        attempts,
        worst_case_ms: config.worst_case().as_millis(),
    }
}

/// Runs the schedule command.
pub fn run(schedule: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = match schedule {
        Some(text) => parse_schedule(text)?,
        None => RetryConfig::default(),
    };
    let report = report(&config);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{:>7}  {:>10}  {:>10}  {:>11}", "attempt", "delay ms", "timeout ms", "deadline ms");
        for row in &report.attempts {
            println!(
                "{:>7}  {:>10}  {:>10}  {:>11}",
                row.attempt, row.pre_delay_ms, row.timeout_ms, row.deadline_ms
            );
        }
        println!("worst case: {}ms", report.worst_case_ms);
    }
    Ok(())
}
