//! Session descriptions and the textual edits applied to them.
//!
//! The edits are line anchored pattern replacements on the SDP text. No structural
//! SDP parsing is done. Apart from the edited lines the output is byte-for-byte what
//! the endpoint produced.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};

/// Payload type of the RED codec removed by [`remove_video_fec()`].
pub const RED_PT: u8 = 116;

/// Payload type of the ULPFEC codec removed by [`remove_video_fec()`].
pub const ULPFEC_PT: u8 = 117;

// The m-line must end with the two payload types. The space in front of them stays.
static FEC_MLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(m=video 1 [^\r\n]+)116 117\r\n").expect("FEC m-line regex")
});

static RED_RTPMAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^a=rtpmap:116 red/90000\r\n").expect("red rtpmap regex"));

static ULPFEC_RTPMAP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^a=rtpmap:117 ulpfec/90000\r\n").expect("ulpfec rtpmap regex")
});

// Also swallows a b=AS line from a previous application.
static VIDEO_MID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^a=mid:video\r\n(?:b=AS:[0-9]+\r\n)?").expect("video mid regex")
});

/// Type of [`SessionDescription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// SDP offer.
    Offer,
    /// Provisional answer.
    Pranswer,
    /// SDP answer.
    Answer,
    /// Rollback of a pending offer.
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        write!(f, "{x}")
    }
}

/// An offer or answer as exchanged between endpoints.
///
/// Serializes to the same JSON shape as the browser `RTCSessionDescriptionInit`.
///
/// ```
/// # use loopcall::SessionDescription;
/// let offer = SessionDescription::offer("v=0\r\n");
/// let json = serde_json::to_string(&offer).unwrap();
/// assert_eq!(json, r#"{"type":"offer","sdp":"v=0\r\n"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// The SDP text.
    pub sdp: String,
}

impl SessionDescription {
    /// Creates an offer from SDP text.
    pub fn offer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Creates an answer from SDP text.
    pub fn answer(sdp: impl Into<String>) -> Self {
        SessionDescription {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Remove the video RED/ULPFEC payload types from an offer.
///
/// Deletes the `a=rtpmap` lines for payload types 116 (red) and 117 (ulpfec) and
/// drops `116 117` from the end of the `m=video 1 ...` line. Text without these lines
/// is returned unchanged.
pub fn remove_video_fec(sdp: &str) -> String {
    let sdp = FEC_MLINE.replace_all(sdp, "${1}\r\n");
    let sdp = RED_RTPMAP.replace_all(&sdp, "");
    let sdp = ULPFEC_RTPMAP.replace_all(&sdp, "");
    sdp.into_owned()
}

/// Cap the video bandwidth of an answer.
///
/// Puts a `b=AS:<kbps>` line directly after `a=mid:video`. An existing `b=AS` line in
/// that position is replaced, so applying this twice gives the same result as once.
pub fn constrain_video_bitrate(sdp: &str, kbps: u32) -> String {
    let line = format!("a=mid:video\r\nb=AS:{kbps}\r\n");
    VIDEO_MID.replace_all(sdp, NoExpand(&line)).into_owned()
}

/// The SDP edits configured for a call.
///
/// Each edit targets one side of the handshake: FEC removal applies to the offer,
/// the bitrate cap to the answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Munging {
    /// Strip RED/ULPFEC from the video section of the offer.
    pub remove_video_fec: bool,
    /// Max video bitrate in kbps for the answer.
    pub max_video_bitrate: Option<u32>,
}

impl Munging {
    /// Apply the offer edits. Returns whether the description was touched.
    ///
    /// Descriptions that are not offers are left alone.
    pub fn apply_to_offer(&self, desc: &mut SessionDescription) -> bool {
        if desc.kind != SdpType::Offer || !self.remove_video_fec {
            return false;
        }
        desc.sdp = remove_video_fec(&desc.sdp);
        true
    }

    /// Apply the answer edits. Returns whether the description was touched.
    ///
    /// Descriptions that are not answers are left alone.
    pub fn apply_to_answer(&self, desc: &mut SessionDescription) -> bool {
        let Some(kbps) = self.max_video_bitrate else {
            return false;
        };
        if desc.kind != SdpType::Answer {
            return false;
        }
        desc.sdp = constrain_video_bitrate(&desc.sdp, kbps);
        true
    }
}
