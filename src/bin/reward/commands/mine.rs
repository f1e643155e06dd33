//! Mine command - start, stop and claim sessions

use crate::client::RewardClient;
use crate::style::*;
use anyhow::{anyhow, Result};
use uuid::Uuid;

pub async fn start(server: &str, user: &str) -> Result<()> {
    let session = RewardClient::new(server).start(user).await?;
    print_success(&format!("Mining started for {}", style_cyan(user)));
    print_row("Session id", &session.session_id.to_string());
    print_row("Phase", &session.snapshot.inputs.phase.name);
    print_row("Started", &session.started_at.to_rfc3339());
    Ok(())
}

pub async fn stop(server: &str, user: &str) -> Result<()> {
    let session = RewardClient::new(server).stop(user).await?;
    print_success(&format!("Mining stopped for {}", style_cyan(user)));
    print_row("Session id", &session.session_id.to_string());
    print_row("Accrued", &style_bold(&format_tokens(session.accrued)));
    Ok(())
}

pub async fn claim(server: &str, user: &str, session: Option<Uuid>) -> Result<()> {
    let client = RewardClient::new(server);
    let session_id = match session {
        Some(id) => id,
        None => client
            .status(user)
            .await?
            .session_id
            .ok_or_else(|| anyhow!("{} has no current session to claim", user))?,
    };

    let result = client.claim(user, session_id).await?;
    if result.replayed {
        print_warning("Session was already claimed; showing the original claim");
    } else {
        print_success(&format!("Claimed {}", style_green(&format_tokens(result.amount))));
    }
    print_row("Session id", &result.session_id.to_string());
    print_row("Amount", &format_tokens(result.amount));
    if result.excess > 0.0 {
        print_row("Over cap", &style_yellow(&format_tokens(result.excess)));
    }
    print_row("Claimed at", &result.claimed_at.to_rfc3339());
    print_row("Key", &style_dim(&result.idempotency_key));
    Ok(())
}
