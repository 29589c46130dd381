//! Per-call session bridge: connection acceptance, handshake, the two
//! concurrent audio pumps, and teardown.
//!
//! One accepted call is handled by two units of work. The inbound pump runs
//! as the session's main loop (telephony → upstream); the outbound pump runs
//! as a spawned task (upstream → telephony). They share nothing mutable:
//! each owns its connection halves and its sample buffer. The outbound task
//! handle is stored in the session and joined during teardown so no
//! concurrent work outlives the call.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, info, warn};

use crate::admin::AdminClient;
use crate::audio::{self, AudioRates, SampleBuffer};
use crate::config::Config;
use crate::prompt;
use crate::protocol::{self, TelephonyMessage};
use crate::upstream::{
    UpstreamClient, UpstreamConfig, UpstreamEvent, UpstreamReceiver, UpstreamSender,
};

type TelephonyWs = WebSocketStream<TcpStream>;

/// Hard bound on the wait for the start event.
const START_TIMEOUT: Duration = Duration::from_secs(10);

/// Validate an inbound connection, perform the start-event handshake, then
/// run the bridged session to completion.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<Config>,
    admin: Arc<AdminClient>,
) -> Result<()> {
    let mut request_uri = None;
    let mut ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        request_uri = Some(req.uri().clone());
        Ok(resp)
    })
    .await
    .context("websocket handshake failed")?;
    let uri = request_uri.context("handshake produced no request uri")?;

    // gateways append query params; only the base path must match exactly
    if uri.path() != config.ws_path {
        warn!(%peer, path = uri.path(), expected = %config.ws_path, "rejecting connection: invalid path");
        close_with_policy(&mut ws, "Invalid path").await;
        return Ok(());
    }

    let agent = agent_from_query(uri.query(), &config.default_agent);
    if !config.agents.contains_key(&agent) {
        warn!(%peer, %agent, "rejecting connection: unknown agent");
        close_with_policy(&mut ws, &format!("Unknown agent: {agent}")).await;
        return Ok(());
    }

    debug!(%peer, %agent, "connection accepted, awaiting start event");

    let first = match timeout(START_TIMEOUT, ws.next()).await {
        Err(_) => {
            warn!(%peer, %agent, "no start event within {START_TIMEOUT:?}");
            close_with_policy(&mut ws, "Timeout waiting for start event").await;
            return Ok(());
        }
        // peer went away before the handshake completed
        Ok(None) => return Ok(()),
        Ok(Some(Err(e))) => {
            debug!(%peer, "handshake read error: {e}");
            return Ok(());
        }
        Ok(Some(Ok(msg))) => msg,
    };

    // any first message that is not a parseable start event is rejected,
    // including media frames that race the start event at the wire level
    let start = match first
        .to_text()
        .ok()
        .and_then(|text| serde_json::from_str::<TelephonyMessage>(text).ok())
    {
        Some(TelephonyMessage::Start(ev)) => ev,
        _ => {
            close_with_policy(&mut ws, "Expected start event").await;
            return Ok(());
        }
    };
    let ucid = start.ucid();
    info!(%ucid, %agent, "start event received");

    let system_instructions = prompt::resolve(&config, &agent).await;
    let upstream = UpstreamClient::connect(UpstreamConfig {
        service_url: config.upstream_url.clone(),
        model: config.upstream_model.clone(),
        voice: config.upstream_voice.clone(),
        system_instructions,
        input_sample_rate: config.upstream_input_sample_rate,
        vad_silence_ms: config.vad_silence_ms,
        vad_prefix_ms: config.vad_prefix_ms,
    })
    .await
    .context("upstream connect failed")?;
    info!(%ucid, "connected to upstream voice agent");

    let started_at = epoch_ms();
    let mut session = Session::start(ucid.clone(), ws, upstream, &config);
    let result = session.run_inbound().await;
    session.teardown().await;

    let ended_at = epoch_ms();
    admin.push_fire_and_forget(
        json!({
            "ucid": ucid,
            "agent": agent,
            "startedAtMs": started_at,
            "endedAtMs": ended_at,
            "durationMs": ended_at.saturating_sub(started_at),
        }),
        ucid.clone(),
    );

    result
}

/// State owned by the session's main loop. The outbound task owns the other
/// halves plus its own buffer, so neither side needs locking.
struct Session {
    ucid: String,
    telephony_rx: SplitStream<TelephonyWs>,
    upstream_tx: UpstreamSender,
    input: SampleBuffer,
    rates: AudioRates,
    input_chunk: usize,
    outbound: JoinHandle<()>,
    closed: bool,
}

impl Session {
    /// Split both connections and start the outbound pump task.
    fn start(ucid: String, ws: TelephonyWs, upstream: UpstreamClient, config: &Config) -> Self {
        let (telephony_tx, telephony_rx) = ws.split();
        let (upstream_tx, upstream_rx) = upstream.split();
        let rates = config.rates();

        let outbound = tokio::spawn(
            OutboundPump {
                ucid: ucid.clone(),
                telephony_tx,
                upstream_rx,
                output: SampleBuffer::new(),
                rates,
                chunk_len: config.output_chunk_samples,
            }
            .run(),
        );

        Self {
            ucid,
            telephony_rx,
            upstream_tx,
            input: SampleBuffer::new(),
            rates,
            input_chunk: config.input_chunk_samples,
            outbound,
            closed: false,
        }
    }

    /// Inbound pump, telephony → upstream. Returns on a stop event, peer
    /// close, or read error; an upstream send failure propagates.
    async fn run_inbound(&mut self) -> Result<()> {
        while let Some(next) = self.telephony_rx.next().await {
            let msg = match next {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(ucid = %self.ucid, "telephony read error: {e}");
                    break;
                }
            };
            if let Message::Close(_) = msg {
                debug!(ucid = %self.ucid, "telephony peer closed");
                break;
            }
            let Ok(text) = msg.to_text() else { continue };
            // malformed frames are skipped, not fatal
            let Ok(parsed) = serde_json::from_str::<TelephonyMessage>(text) else {
                continue;
            };

            match parsed {
                TelephonyMessage::Stop | TelephonyMessage::End | TelephonyMessage::Close => {
                    info!(ucid = %self.ucid, "stop event received");
                    break;
                }
                TelephonyMessage::Media { data: Some(data) } if !data.samples.is_empty() => {
                    self.input.extend(&data.samples);
                    while let Some(chunk) = self.input.pop_chunk(self.input_chunk) {
                        let converted = audio::resample(
                            &chunk,
                            self.rates.telephony_hz,
                            self.rates.upstream_in_hz,
                        );
                        self.upstream_tx
                            .send_audio(&converted)
                            .await
                            .context("forwarding audio upstream")?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Cancel the outbound task, await its exit, then close the upstream
    /// exactly once. Secondary errors are logged, never propagated.
    async fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.outbound.abort();
        if let Err(e) = (&mut self.outbound).await
            && !e.is_cancelled()
        {
            warn!(ucid = %self.ucid, "outbound task panicked: {e}");
        }

        if let Err(e) = self.upstream_tx.close().await {
            debug!(ucid = %self.ucid, "upstream close error: {e}");
        }
    }
}

/// Outbound pump, upstream → telephony. Owns its halves and buffer; runs as
/// a spawned task until the upstream stream terminates or it is aborted.
struct OutboundPump {
    ucid: String,
    telephony_tx: SplitSink<TelephonyWs, Message>,
    upstream_rx: UpstreamReceiver,
    output: SampleBuffer,
    rates: AudioRates,
    chunk_len: usize,
}

impl OutboundPump {
    async fn run(mut self) {
        while let Some(next) = self.upstream_rx.next_event().await {
            let event = match next {
                Ok(event) => event,
                Err(e) => {
                    debug!(ucid = %self.ucid, "upstream read error: {e}");
                    break;
                }
            };
            // per-message errors are logged and the stream continues
            if let Err(e) = self.handle_event(event).await {
                warn!(ucid = %self.ucid, "outbound processing error: {e:#}");
            }
        }
        debug!(ucid = %self.ucid, "outbound pump exited");
    }

    async fn handle_event(&mut self, event: UpstreamEvent) -> Result<()> {
        match event {
            UpstreamEvent::Interrupted => {
                // barge-in: everything queued for playback is stale and must
                // never reach the caller
                debug!(
                    ucid = %self.ucid,
                    dropped = self.output.len(),
                    "interrupted, clearing output buffer"
                );
                self.output.clear();
            }
            UpstreamEvent::SetupComplete => {
                debug!(ucid = %self.ucid, "upstream setup complete");
            }
            UpstreamEvent::AudioChunk(bytes) => {
                let samples = audio::le_bytes_to_samples(&bytes);
                let converted =
                    audio::resample(&samples, self.rates.upstream_out_hz, self.rates.telephony_hz);
                self.output.extend(&converted);
                for frame in
                    drain_frames(&mut self.output, &self.ucid, self.chunk_len, self.rates.telephony_hz)?
                {
                    self.telephony_tx.send(Message::Text(frame.into())).await?;
                }
            }
            UpstreamEvent::Other => {}
        }
        Ok(())
    }
}

/// Serialize every full chunk currently buffered into outbound media frames,
/// oldest first. Samples shorter than a chunk stay queued.
fn drain_frames(
    buffer: &mut SampleBuffer,
    ucid: &str,
    chunk_len: usize,
    sample_rate: u32,
) -> Result<Vec<String>> {
    let mut frames = Vec::new();
    while let Some(chunk) = buffer.pop_chunk(chunk_len) {
        frames.push(protocol::media_frame(ucid, &chunk, sample_rate)?);
    }
    Ok(frames)
}

/// `agent` query parameter, defaulted and normalized to lowercase.
fn agent_from_query(query: Option<&str>, default_agent: &str) -> String {
    query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "agent")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_else(|| default_agent.to_string())
        .to_lowercase()
}

/// Close with a policy-violation code (1008) and a diagnostic reason.
async fn close_with_policy(ws: &mut TelephonyWs, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::Policy,
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!("close error: {e}");
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
