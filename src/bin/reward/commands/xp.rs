//! Xp command - offline XP award for a single activity

use crate::style::*;
use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use reward_engine::xp::{XpOutcome, XpRequest, XpState};
use reward_engine::{ActivityType, Config, Platform, XpEngine};

pub fn run(
    activity: ActivityType,
    platform: Platform,
    quality: f64,
    streak: u32,
    level: u32,
) -> Result<()> {
    if level == 0 {
        bail!("Level starts at 1");
    }

    let config = Config::load()?;
    let engine = XpEngine::new(config.engine.xp);
    let now = Utc::now();

    // A user at `level` who was last active yesterday with a `streak`-day streak
    let mut state = XpState::new(now);
    state.level = level;
    state.total_xp = engine.config().level_curve.xp_for_level(level);
    if streak > 0 {
        state.streak_days = streak - 1;
        state.last_activity_at = Some(now - Duration::hours(1));
        state.last_streak_day = Some((now - Duration::days(1)).date_naive());
    }

    let outcome = engine.award(
        &mut state,
        &XpRequest {
            activity,
            platform,
            content_id: None,
            quality_score: quality,
            boost_multiplier: 1.0,
            at: now,
        },
    )?;

    print_header("XP Award");
    print_row("Activity", &style_cyan(&format!("{:?}", activity)));
    print_row("Platform", &format!("{:?}", platform));

    match outcome {
        XpOutcome::Awarded(award) => {
            let b = &award.breakdown;
            print_row("Base XP", &b.base_xp.to_string());
            print_row("Platform", &format_factor(b.platform_multiplier));
            print_row("Quality", &format_factor(b.quality_score));
            print_row("Streak", &format_factor(b.streak_bonus));
            print_row("Progression", &format_factor(b.level_progression));
            print_row("Event", &format_factor(b.event_multiplier));
            println!();
            print_row("XP gained", &style_bold(&style_green(&award.xp_gained.to_string())));
            if let Some(up) = award.level_up {
                print_success(&format!(
                    "Level up {} -> {} ({:?})",
                    up.from, up.to, up.tier
                ));
            }
        }
        XpOutcome::Rejected { reason } => {
            print_warning(&format!("No XP credited: {:?}", reason));
        }
    }

    Ok(())
}
