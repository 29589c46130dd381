//! System-prompt resolution for an agent.
//!
//! Priority: admin API (editable at runtime) → local prompt file → generic
//! templated prompt. Resolution never fails; a degraded prompt is always
//! better than a dead call.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Config;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptResponse {
    system_instructions: Option<String>,
}

/// Resolve the system prompt for `agent` (already validated and lowercased).
pub async fn resolve(config: &Config, agent: &str) -> String {
    if let Some(prompt) = fetch_remote(config, agent).await {
        return prompt;
    }
    read_local(config, agent)
}

/// Fetch from the admin API. Any error or empty content falls through to the
/// local file.
async fn fetch_remote(config: &Config, agent: &str) -> Option<String> {
    let url = format!(
        "{}/api/telephony/prompt/{}",
        config.admin_api_base.trim_end_matches('/'),
        agent
    );
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .ok()?;

    match client.get(&url).header("Accept", "application/json").send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<PromptResponse>().await {
            Ok(body) => {
                let prompt = body
                    .system_instructions
                    .filter(|s| !s.trim().is_empty())?;
                info!(agent, "loaded prompt from admin api");
                Some(prompt)
            }
            Err(e) => {
                warn!(agent, "prompt response decode error: {e}");
                None
            }
        },
        Ok(resp) => {
            warn!(agent, status = %resp.status(), "prompt api error");
            None
        }
        Err(e) => {
            warn!(agent, "prompt api unavailable: {e}");
            None
        }
    }
}

/// Load the agent's prompt file, or fall back to a generic template when the
/// file is missing or unreadable.
fn read_local(config: &Config, agent: &str) -> String {
    let Some(file) = config.agents.get(agent) else {
        return generic_prompt(agent);
    };
    let path = Path::new(&config.prompt_dir).join(file);
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            info!(agent, file = %path.display(), "loaded prompt from file");
            text
        }
        Err(e) => {
            warn!(agent, file = %path.display(), "prompt file unreadable: {e}");
            generic_prompt(agent)
        }
    }
}

fn generic_prompt(agent: &str) -> String {
    format!("You are a helpful {agent} sales assistant. Be concise and friendly.")
}
