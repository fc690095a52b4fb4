//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    last_published_at: Option<String>,
    components: HashMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    message: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str, metrics_url: Option<&str>) -> Result<()> {
    println!("Checking health at {}...\n", url);

    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => {
                    print_health_status(&health, status_code.as_u16());
                }
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the w2p relay running?");
            println!("Start it with: w2p run --config <path-to-config>");
            return Ok(());
        }
    }

    let metrics_url = match metrics_url {
        Some(url) => url.to_string(),
        None => default_metrics_url(url),
    };

    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&parse_metrics(&text));
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

/// Metrics live on port 9090 next to the health server on 8080.
fn default_metrics_url(health_url: &str) -> String {
    health_url
        .replace(":8080", ":9090")
        .replace("/health", "")
        .trim_end_matches('/')
        .to_string()
        + "/metrics"
}

fn status_marker(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_marker(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    if let Some(state) = &health.state {
        println!("Connection:     {}", state);
    }
    if let Some(at) = &health.last_published_at {
        println!("Last publish:   {}", at);
    }
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        let mut names: Vec<_> = health.components.keys().collect();
        names.sort();
        for name in names {
            let status = &health.components[name];
            let marker = status_marker(&status.status);
            if let Some(msg) = &status.message {
                println!("  {} {}: {} ({})", marker, name, status.status, msg);
            } else {
                println!("  {} {}: {}", marker, name, status.status);
            }
        }
    }
}

/// Parse integer samples from Prometheus text format, keyed by name and labels.
fn parse_metrics(metrics_text: &str) -> HashMap<String, u64> {
    metrics_text
        .lines()
        .filter(|line| !line.starts_with('#') && !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let value = parts.next()?.parse::<u64>().ok()?;
            Some((name.to_string(), value))
        })
        .collect()
}

fn print_metrics(values: &HashMap<String, u64>) {
    if values.is_empty() {
        println!("No metrics available yet.");
        return;
    }

    let rows = [
        ("Frames Received:", "w2p_frames_total"),
        ("Events Published:", "w2p_published_total"),
        ("Heartbeats:", "w2p_heartbeats_total"),
        ("Decode Errors:", "w2p_errors{type=\"decode\"}"),
        ("Publish Retries:", "w2p_publish_retries_total"),
        ("Events Lost:", "w2p_lost_total"),
        ("Connections:", "w2p_connections_total"),
        ("Errors:", "w2p_errors_total"),
    ];
    for (label, key) in rows {
        if let Some(v) = values.get(key) {
            println!("{:<18} {}", label, format_number(*v));
        }
    }

    if let Some(ms) = values.get("w2p_backoff_milliseconds").filter(|ms| **ms > 0) {
        println!("{:<18} {}ms", "Reconnect Backoff:", ms);
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metrics() {
        let text = "# HELP w2p_frames_total Frames\n\
                    # TYPE w2p_frames_total counter\n\
                    w2p_frames_total 42\n\
                    \n\
                    w2p_errors{type=\"decode\"} 3\n\
                    w2p_publish_duration_seconds_sum 0.25\n";

        let values = parse_metrics(text);
        assert_eq!(values.get("w2p_frames_total"), Some(&42));
        assert_eq!(values.get("w2p_errors{type=\"decode\"}"), Some(&3));
        // Non-integer samples are skipped
        assert!(!values.contains_key("w2p_publish_duration_seconds_sum"));
    }

    #[test]
    fn test_default_metrics_url() {
        assert_eq!(
            default_metrics_url("http://localhost:8080"),
            "http://localhost:9090/metrics"
        );
        assert_eq!(
            default_metrics_url("http://relay:8080/health"),
            "http://relay:9090/metrics"
        );
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(2_000_000), "2.00M");
        assert_eq!(format_number(3_000_000_000), "3.00B");
    }

    #[test]
    fn test_health_response_without_optional_fields() {
        let health: HealthResponse = serde_json::from_str(
            r#"{"status":"healthy","components":{"source":{"status":"healthy","message":null}}}"#,
        )
        .unwrap();
        assert!(health.state.is_none());
        assert_eq!(health.components["source"].status, "healthy");
    }
}
