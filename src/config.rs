//! Runtime configuration, loaded from an optional TOML file with
//! `BRIDGE_*` environment overrides. Every field has a default so the
//! service starts with no file present.

use std::collections::HashMap;

use anyhow::Result;
use serde::Deserialize;

use crate::audio::AudioRates;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for the telephony WebSocket server
    pub host: String,
    pub port: u16,
    /// Exact base path inbound connections must request (query string ignored)
    pub ws_path: String,

    /// Agent selected when the `agent` query parameter is absent
    pub default_agent: String,
    /// Allow-list of agents, mapping each to its local fallback prompt file
    pub agents: HashMap<String, String>,
    /// Directory holding the fallback prompt files
    pub prompt_dir: String,

    /// Base URL of the admin service (prompt endpoint and call ingest)
    pub admin_api_base: String,
    pub enable_admin_push: bool,

    /// Upstream voice-agent service WebSocket URL
    pub upstream_url: String,
    pub upstream_model: String,
    pub upstream_voice: String,
    pub vad_silence_ms: u32,
    pub vad_prefix_ms: u32,

    pub telephony_sample_rate: u32,
    pub upstream_input_sample_rate: u32,
    pub upstream_output_sample_rate: u32,
    /// Samples buffered per chunk sent upstream, at the telephony rate
    pub input_chunk_samples: usize,
    /// Samples buffered per frame sent to telephony, at the telephony rate
    pub output_chunk_samples: usize,
}

impl Default for Config {
    fn default() -> Self {
        let mut agents = HashMap::new();
        agents.insert("spotlight".to_string(), "kia_prompt.txt".to_string());
        agents.insert("tata".to_string(), "tata_prompt.txt".to_string());
        agents.insert("skoda".to_string(), "skoda_prompt.txt".to_string());

        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            default_agent: "spotlight".to_string(),
            agents,
            prompt_dir: "prompts".to_string(),
            admin_api_base: "http://127.0.0.1:3100".to_string(),
            enable_admin_push: true,
            upstream_url: "wss://us-central1-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.LlmBidiService/BidiGenerateContent".to_string(),
            upstream_model: "models/gemini-2.0-flash-live-preview".to_string(),
            upstream_voice: "Puck".to_string(),
            vad_silence_ms: 500,
            vad_prefix_ms: 500,
            telephony_sample_rate: 8000,
            upstream_input_sample_rate: 16000,
            upstream_output_sample_rate: 24000,
            input_chunk_samples: 160,
            output_chunk_samples: 160,
        }
    }
}

impl Config {
    /// Load from `<path>.toml` if present, then apply `BRIDGE_*` env
    /// overrides (e.g. `BRIDGE_PORT=9090`).
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("BRIDGE"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn rates(&self) -> AudioRates {
        AudioRates {
            telephony_hz: self.telephony_sample_rate,
            upstream_in_hz: self.upstream_input_sample_rate,
            upstream_out_hz: self.upstream_output_sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = Config::default();
        assert!(cfg.agents.contains_key(&cfg.default_agent));
        assert!(cfg.input_chunk_samples > 0);
        assert!(cfg.output_chunk_samples > 0);
        assert_eq!(cfg.rates().telephony_hz, 8000);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = Config::load("does_not_exist_config").unwrap();
        assert_eq!(cfg.ws_path, "/ws");
        assert_eq!(cfg.default_agent, "spotlight");
    }
}
