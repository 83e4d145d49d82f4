use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use radpro_core::{DeviceIdentity, PollerView};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Ndjson,
}

pub fn device_json(endpoint: &str, identity: &DeviceIdentity, sensitivity: Option<f64>) -> Value {
    json!({
        "endpoint": endpoint,
        "unique_id": identity.unique_id(endpoint),
        "hardware_id": identity.hardware_id,
        "software_id": identity.software_id,
        "device_id": identity.device_id,
        "model": identity.model(),
        "version": identity.sw_version(),
        "battery_voltage_per_cell": identity.battery_voltage,
        "sensitivity_cpm_per_usvh": sensitivity,
    })
}

pub fn view_json(view: &PollerView, endpoint: &str) -> Value {
    json!({
        "endpoint": endpoint,
        "device_id": view.identity.unique_id(endpoint),
        "model": view.identity.model(),
        "version": view.identity.sw_version(),
        "battery_voltage_per_cell": view.identity.battery_voltage,
        "snapshot": view.snapshot,
        "stats": view.stats,
    })
}

fn metric(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{v:.precision$}"))
        .unwrap_or_else(|| "n/a".to_string())
}

pub fn human_lines(view: &PollerView, endpoint: &str, now: DateTime<Utc>) -> Vec<String> {
    let identity = &view.identity;
    let mut lines = vec!["=== Rad Pro Snapshot ===".to_string()];

    lines.push(format!(
        "Device:     {} {} ({})",
        identity.model().unwrap_or_else(|| "Dosimeter".to_string()),
        identity
            .sw_version()
            .map(|v| format!("v{v}"))
            .unwrap_or_default(),
        identity.unique_id(endpoint),
    ));
    lines.push(format!("Port:       {endpoint}"));

    match &view.snapshot {
        Some(snapshot) => {
            lines.push(format!(
                "Time:       {}",
                snapshot.ts.with_timezone(&Local).to_rfc3339()
            ));
            lines.push(format!(
                "Rate:       {} cps  {} cpm  {} µSv/h",
                metric(snapshot.cps, 2),
                metric(snapshot.cpm, 0),
                metric(snapshot.usvh, 2),
            ));
            lines.push(format!(
                "Pulses:     {}",
                snapshot
                    .pulse_count
                    .map(|count| count.to_string())
                    .unwrap_or_else(|| "n/a".to_string())
            ));
        }
        None => lines.push("Rate:       no successful reading yet".to_string()),
    }

    if let Some(volts) = identity.battery_voltage {
        lines.push(format!("Battery:    {volts:.3} V/cell"));
    }
    lines.push(format!(
        "Quality:    ok={} err={} failures_in_row={}",
        view.stats.reads_ok, view.stats.reads_err, view.stats.consecutive_failures
    ));
    if let Some(age) = view.stats.age_seconds(now) {
        lines.push(format!("Age:        {age:.1} s since last reading"));
    }
    if let Some(err) = &view.stats.last_error {
        if view.stats.consecutive_failures > 0 {
            lines.push(format!("Last error: {err}"));
        }
    }

    lines
}

pub fn print_view(view: &PollerView, endpoint: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view_json(view, endpoint))?),
        OutputFormat::Ndjson => println!("{}", serde_json::to_string(&view_json(view, endpoint))?),
        OutputFormat::Human => {
            for line in human_lines(view, endpoint, Utc::now()) {
                println!("{line}");
            }
        }
    }
    Ok(())
}
