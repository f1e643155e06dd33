//! Rate command - offline mining rate with per-factor breakdown

use crate::style::*;
use anyhow::{bail, Result};
use reward_engine::{Config, MiningCalculator, MiningInputs};

pub struct RateArgs {
    pub network_users: u64,
    pub holdings: f64,
    pub referrals: u32,
    pub level: u32,
    pub rp_tier: u32,
    pub kyc: bool,
    pub quality: f64,
    pub boost: f64,
}

pub fn run(args: RateArgs) -> Result<()> {
    if args.rp_tier > 4 {
        bail!("Referral tier index must be between 0 and 4");
    }
    if !args.holdings.is_finite() || args.holdings < 0.0 {
        bail!("Holdings must be a non-negative number");
    }

    let config = Config::load()?;
    let calculator = MiningCalculator::new(config.engine.mining);
    let phase = calculator.phase_for(args.network_users);

    let rate = calculator.calculate(&MiningInputs {
        phase,
        network_users: args.network_users,
        holdings: args.holdings,
        active_referrals: args.referrals,
        xp_level: args.level,
        rp_tier_index: args.rp_tier,
        kyc_verified: args.kyc,
        quality_score: args.quality,
        boost_multiplier: args.boost,
    });
    let b = &rate.breakdown;

    print_header("Mining Rate");
    print_row("Phase", &style_cyan(&rate.phase));
    print_row("Base rate", &format_tokens(b.base_rate));
    print_row("Pioneer", &format_factor(b.pioneer_bonus));
    print_row("Referral", &format_factor(b.referral_bonus));
    print_row("Security", &format_factor(b.security_bonus));
    print_row("XP level", &format_factor(b.xp_multiplier));
    print_row("RP tier", &format_factor(b.rp_multiplier));
    print_row("Quality", &format_factor(b.quality_score));
    print_row("Regression", &format_factor(b.regression_factor));
    print_row("Boost", &format_factor(b.boost_multiplier));
    println!();
    print_row("Unclamped", &format_tokens(rate.unclamped_rate));
    print_row("Hourly rate", &style_bold(&style_green(&format_tokens(rate.hourly_rate))));
    print_row("Daily cap", &format_tokens(rate.daily_cap));
    if rate.excess_hourly > 0.0 {
        println!();
        print_warning(&format!(
            "{}/h above the daily cap is not paid",
            format_tokens(rate.excess_hourly)
        ));
    }

    Ok(())
}
