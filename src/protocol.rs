//! Telephony-side wire protocol: JSON text frames in both directions.
//!
//! Inbound frames are classified up front into a tagged enum so the pumps
//! only branch on variants. Outbound media frames mirror the gateway's
//! expected shape exactly, one frame per emitted chunk.

use serde::{Deserialize, Serialize};

/// Messages received from the telephony gateway, tagged by `event`.
///
/// Unknown event types decode as `Other` and are ignored by the pumps;
/// frames that fail to decode entirely are skipped at the call site.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyMessage {
    Start(StartEvent),
    Media {
        data: Option<MediaPayload>,
    },
    Stop,
    End,
    Close,
    #[serde(other)]
    Other,
}

/// The handshake start event. Gateways disagree on where the call id lives,
/// so all known locations are modeled and checked in order.
#[derive(Debug, Deserialize)]
pub struct StartEvent {
    pub ucid: Option<String>,
    pub start: Option<UcidField>,
    pub data: Option<UcidField>,
}

#[derive(Debug, Deserialize)]
pub struct UcidField {
    pub ucid: Option<String>,
}

/// Sentinel call id used when the start event carries none. Not an error.
pub const UNKNOWN_UCID: &str = "UNKNOWN";

impl StartEvent {
    /// Call id from `ucid`, `start.ucid`, or `data.ucid`, in that order.
    pub fn ucid(&self) -> String {
        self.ucid
            .clone()
            .or_else(|| self.start.as_ref().and_then(|s| s.ucid.clone()))
            .or_else(|| self.data.as_ref().and_then(|d| d.ucid.clone()))
            .unwrap_or_else(|| UNKNOWN_UCID.to_string())
    }
}

/// Payload of an inbound media event.
#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub samples: Vec<i16>,
}

#[derive(Serialize)]
struct MediaFrame<'a> {
    event: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    ucid: &'a str,
    data: MediaFrameData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaFrameData<'a> {
    samples: &'a [i16],
    bits_per_sample: u8,
    sample_rate: u32,
    channel_count: u8,
    number_of_frames: usize,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Serialize one outbound media frame carrying exactly one chunk of samples
/// at the telephony rate.
pub fn media_frame(ucid: &str, samples: &[i16], sample_rate: u32) -> anyhow::Result<String> {
    let frame = MediaFrame {
        event: "media",
        kind: "media",
        ucid,
        data: MediaFrameData {
            samples,
            bits_per_sample: 16,
            sample_rate,
            channel_count: 1,
            number_of_frames: samples.len(),
            kind: "data",
        },
    };
    Ok(serde_json::to_string(&frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_with_top_level_ucid() {
        let msg: TelephonyMessage =
            serde_json::from_str(r#"{"event":"start","ucid":"abc-123"}"#).unwrap();
        match msg {
            TelephonyMessage::Start(ev) => assert_eq!(ev.ucid(), "abc-123"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn start_ucid_fallback_locations() {
        let nested: TelephonyMessage =
            serde_json::from_str(r#"{"event":"start","start":{"ucid":"n1"}}"#).unwrap();
        let in_data: TelephonyMessage =
            serde_json::from_str(r#"{"event":"start","data":{"ucid":"n2"}}"#).unwrap();
        let absent: TelephonyMessage = serde_json::from_str(r#"{"event":"start"}"#).unwrap();
        let ucids: Vec<String> = [nested, in_data, absent]
            .into_iter()
            .map(|m| match m {
                TelephonyMessage::Start(ev) => ev.ucid(),
                other => panic!("unexpected variant: {other:?}"),
            })
            .collect();
        assert_eq!(ucids, vec!["n1", "n2", UNKNOWN_UCID]);
    }

    #[test]
    fn top_level_ucid_wins_over_nested() {
        let msg: TelephonyMessage = serde_json::from_str(
            r#"{"event":"start","ucid":"top","start":{"ucid":"nested"}}"#,
        )
        .unwrap();
        match msg {
            TelephonyMessage::Start(ev) => assert_eq!(ev.ucid(), "top"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn media_event_carries_samples() {
        let msg: TelephonyMessage =
            serde_json::from_str(r#"{"event":"media","data":{"samples":[1,-2,3]}}"#).unwrap();
        match msg {
            TelephonyMessage::Media { data: Some(d) } => assert_eq!(d.samples, vec![1, -2, 3]),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn stop_variants_decode() {
        for raw in [r#"{"event":"stop"}"#, r#"{"event":"end"}"#, r#"{"event":"close"}"#] {
            let msg: TelephonyMessage = serde_json::from_str(raw).unwrap();
            assert!(matches!(
                msg,
                TelephonyMessage::Stop | TelephonyMessage::End | TelephonyMessage::Close
            ));
        }
    }

    #[test]
    fn unknown_event_is_other() {
        let msg: TelephonyMessage =
            serde_json::from_str(r#"{"event":"dtmf","digit":"5"}"#).unwrap();
        assert!(matches!(msg, TelephonyMessage::Other));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(serde_json::from_str::<TelephonyMessage>("not json").is_err());
    }

    #[test]
    fn media_frame_shape() {
        let json = media_frame("u-1", &[10, 20, 30], 8000).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["event"], "media");
        assert_eq!(v["type"], "media");
        assert_eq!(v["ucid"], "u-1");
        assert_eq!(v["data"]["samples"], serde_json::json!([10, 20, 30]));
        assert_eq!(v["data"]["bitsPerSample"], 16);
        assert_eq!(v["data"]["sampleRate"], 8000);
        assert_eq!(v["data"]["channelCount"], 1);
        assert_eq!(v["data"]["numberOfFrames"], 3);
        assert_eq!(v["data"]["type"], "data");
    }
}
