//! Referral command - offline referral points and tier

use crate::style::*;
use anyhow::Result;
use reward_engine::{Config, ReferralCalculator, ReferralSnapshot};

pub fn run(direct: u32, active: u32, network: u32) -> Result<()> {
    let snapshot = ReferralSnapshot {
        direct_referrals: direct,
        active_referrals: active,
        network_size: network,
    };
    snapshot.validate()?;

    let config = Config::load()?;
    let value = ReferralCalculator::new(config.engine.referral).calculate(&snapshot, 1.0);

    print_header("Referral Network");
    print_row("Direct", &direct.to_string());
    print_row("Active", &active.to_string());
    print_row("Network size", &network.to_string());
    print_row("Quality", &format!("{:.3}", value.network_quality));
    println!();
    print_row("Raw points", &format!("{:.2}", value.raw_points));
    print_row("Regression", &format_factor(value.regression_factor));
    print_row("Points", &style_bold(&format!("{:.2}", value.points)));
    print_row("Tier", &style_cyan(&format!("{:?}", value.tier)));

    Ok(())
}
