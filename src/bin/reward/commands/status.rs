//! Status command - show a user's mining status

use crate::style::*;
use anyhow::Result;
use reward_engine::SessionState;

pub async fn run(server: &str, user: &str) -> Result<()> {
    print_header("Mining Status");

    let client = crate::client::RewardClient::new(server);
    let status = client.status(user).await?;

    print_row("User", &style_cyan(&status.user_id));
    let state = match status.state {
        SessionState::Active => style_green("active"),
        SessionState::Claimable => style_yellow("claimable"),
        SessionState::Claimed => style_dim("claimed"),
        SessionState::Idle => style_dim("idle"),
    };
    print_row("Session", &state);
    if let Some(id) = status.session_id {
        print_row("Session id", &style_dim(&id.to_string()));
    }
    if let Some(started) = status.started_at {
        print_row("Started", &started.to_rfc3339());
    }
    print_row("Accrued", &style_bold(&format_tokens(status.accrued)));
    print_row(
        "Hourly rate",
        &format!("{} ({})", format_tokens(status.rate.hourly_rate), status.rate.phase),
    );
    print_row(
        "Today",
        &format!(
            "{} earned, {} remaining",
            format_tokens(status.earned_today),
            format_tokens(status.remaining_today)
        ),
    );
    print_row(
        "XP",
        &format!(
            "level {} ({:?}), {} XP to next",
            status.xp_level, status.xp_tier, status.xp_to_next_level
        ),
    );
    print_row("Referral tier", &format!("{:?}", status.referral_tier));
    print_row("Quality", &format!("{:.3}", status.quality_score));
    print_row("Human", &format!("{:.1}%", status.human_probability * 100.0));

    if !status.boosts.is_empty() {
        println!();
        println!("{}", style_bold("Boosts"));
        for boost in &status.boosts {
            println!(
                "  {:?} {} ({} stacks) until {}",
                boost.kind,
                format_factor(boost.magnitude),
                boost.stacks,
                boost.expires_at.to_rfc3339()
            );
        }
    }

    println!();
    if status.claim_eligible {
        print_success("Ready to claim");
    } else if let Some(at) = status.claimable_at {
        print_warning(&format!("Claimable at {}", at.to_rfc3339()));
    }
    if status.rate.excess_hourly > 0.0 {
        print_warning(&format!(
            "Rate above daily cap by {}/h (not paid)",
            format_tokens(status.rate.excess_hourly)
        ));
    }
    if status.from_cache {
        println!("{}", style_dim("(cached)"));
    }

    Ok(())
}
