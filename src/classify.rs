//! Hardware service name classification.
//!
//! The interception layer often sees only an opaque IOKit-style service
//! identifier, not a resolved sensor. This module maps those identifiers to
//! a [`SensorKind`] by substring containment against fixed pattern tables.
//!
//! The tables are deliberately permissive: a false positive blocks something
//! harmless, a false negative leaks camera or microphone access. When in
//! doubt a fragment goes on the list.

use crate::SensorKind;

/// Camera-side service fragments: per-chip camera input pipelines, ISP
/// firmware user clients, and the video/JPEG encoders that sit on the same
/// capture path.
const CAMERA_PATTERNS: &[&str] = &[
    "CamIn",     // AppleH13CamIn, AppleH14CamIn, ... chip-generation pipelines
    "AppleISP",  // ISP firmware
    "ISPCPU",
    "AppleCamera",
    "AppleAVE",  // video encoder on the capture path
    "AppleJPEG", // JPEG encoder on the capture path
    "AppleVXE",
    "IOMFB",     // framebuffer service grabbed by capture sessions
];

/// Audio-input service fragments: audio engine user clients and codec/DSP
/// services that front the microphone path.
const AUDIO_INPUT_PATTERNS: &[&str] = &[
    "IOAudioEngine", // covers IOAudioEngineUserClient
    "IOAudioControl",
    "AppleHDA",
    "AudioAUUC",
    "AppleAOPAudio",
    "AppleEmbeddedAudio",
];

/// Classify a raw service identifier.
///
/// Matching is case-sensitive substring containment, camera table first.
/// `None` or an empty name classifies as [`SensorKind::None`].
pub fn classify(service_name: Option<&str>) -> SensorKind {
    let Some(name) = service_name else {
        return SensorKind::None;
    };
    if name.is_empty() {
        return SensorKind::None;
    }
    if CAMERA_PATTERNS.iter().any(|p| name.contains(p)) {
        return SensorKind::Camera;
    }
    if AUDIO_INPUT_PATTERNS.iter().any(|p| name.contains(p)) {
        return SensorKind::Microphone;
    }
    SensorKind::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_services_classify_as_camera() {
        assert_eq!(classify(Some("AppleH14CamIn")), SensorKind::Camera);
        assert_eq!(classify(Some("AppleH13CamIn")), SensorKind::Camera);
        assert_eq!(classify(Some("IOMFB")), SensorKind::Camera);
        assert_eq!(classify(Some("AppleJPEGDriver")), SensorKind::Camera);
        assert_eq!(classify(Some("AppleISPCPU2")), SensorKind::Camera);
    }

    #[test]
    fn audio_input_services_classify_as_microphone() {
        assert_eq!(
            classify(Some("IOAudioEngineUserClient")),
            SensorKind::Microphone
        );
        assert_eq!(classify(Some("AppleHDA")), SensorKind::Microphone);
        assert_eq!(classify(Some("AppleHDAEngineInput")), SensorKind::Microphone);
    }

    #[test]
    fn unrelated_and_missing_names_classify_as_none() {
        assert_eq!(classify(Some("SomeUnrelatedService")), SensorKind::None);
        assert_eq!(classify(Some("IOSurfaceRoot")), SensorKind::None);
        assert_eq!(classify(None), SensorKind::None);
        assert_eq!(classify(Some("")), SensorKind::None);
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(classify(Some("applejpeg")), SensorKind::None);
        assert_eq!(classify(Some("iomfb")), SensorKind::None);
    }

    #[test]
    fn camera_table_wins_over_audio_table() {
        // A name containing fragments from both tables resolves to Camera:
        // the tables are checked in order.
        assert_eq!(classify(Some("AppleJPEG_AppleHDA")), SensorKind::Camera);
    }
}
