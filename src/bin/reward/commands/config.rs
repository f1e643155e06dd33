//! Config command - show the server's engine configuration

use crate::client::RewardClient;
use crate::style::*;
use anyhow::Result;

pub async fn run(server: &str) -> Result<()> {
    print_header("Engine Configuration");

    let config = RewardClient::new(server).config().await?;

    if let Some(phases) = config["mining"]["phases"].as_array() {
        println!("{}", style_bold("Phases"));
        for phase in phases {
            println!(
                "  {:<10} from {:>10} users  base {}  cap {}",
                phase["name"].as_str().unwrap_or("?"),
                phase["min_users"].as_u64().unwrap_or(0),
                format_tokens(phase["base_rate"].as_f64().unwrap_or(0.0)),
                format_tokens(phase["daily_cap"].as_f64().unwrap_or(0.0)),
            );
        }
        println!();
    }

    if let Some(thresholds) = config["anti_bot"]["thresholds"].as_object() {
        println!("{}", style_bold("Human-probability thresholds"));
        for (operation, threshold) in thresholds {
            println!("  {:<16} {}", operation, threshold);
        }
        println!();
    }

    println!("{}", style_dim("Full configuration:"));
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
