//! Argument policy check (`gantry check-args`).

use anyhow::Result;

use gantry::config::GatewayConfig;
use gantry::jobs::sanitize_args;

pub fn cmd_check_args(config: &GatewayConfig, tokens: &[String]) -> Result<()> {
    let accepted = sanitize_args(&config.arg_policy(), tokens)?;
    println!("Accepted {} token(s):", accepted.len());
    for token in &accepted {
        println!("  {}", token);
    }
    Ok(())
}
