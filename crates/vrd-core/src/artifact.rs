//! Replicable units of a video.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::VideoId;

/// Kind of replicable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// A single encoded file at a given resolution.
    File,
    /// A streaming-playlist manifest and its segment set.
    StreamingPlaylist,
}

impl ArtifactKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::StreamingPlaylist => "streaming-playlist",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one artifact: `(videoId, artifactKind, resolution)`.
///
/// `resolution` is present iff `kind` is [`ArtifactKind::File`]; the
/// constructors and deserializer enforce this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawArtifactKey")]
pub struct ArtifactKey {
    video_id: VideoId,
    kind: ArtifactKind,
    resolution: Option<u32>,
}

impl ArtifactKey {
    /// Key for an encoded file at `resolution`.
    #[must_use]
    pub const fn file(video_id: VideoId, resolution: u32) -> Self {
        Self {
            video_id,
            kind: ArtifactKind::File,
            resolution: Some(resolution),
        }
    }

    /// Key for the streaming playlist of a video.
    #[must_use]
    pub const fn streaming_playlist(video_id: VideoId) -> Self {
        Self {
            video_id,
            kind: ArtifactKind::StreamingPlaylist,
            resolution: None,
        }
    }

    /// Build a key from loose parts, rejecting inconsistent combinations.
    #[must_use]
    pub const fn from_parts(
        video_id: VideoId,
        kind: ArtifactKind,
        resolution: Option<u32>,
    ) -> Option<Self> {
        match (kind, resolution) {
            (ArtifactKind::File, Some(res)) => Some(Self::file(video_id, res)),
            (ArtifactKind::StreamingPlaylist, None) => Some(Self::streaming_playlist(video_id)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn video_id(&self) -> VideoId {
        self.video_id
    }

    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        self.kind
    }

    #[must_use]
    pub const fn resolution(&self) -> Option<u32> {
        self.resolution
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolution {
            Some(res) => write!(f, "{}/{}@{res}p", self.video_id, self.kind),
            None => write!(f, "{}/{}", self.video_id, self.kind),
        }
    }
}

#[derive(Deserialize)]
struct RawArtifactKey {
    video_id: VideoId,
    kind: ArtifactKind,
    #[serde(default)]
    resolution: Option<u32>,
}

impl TryFrom<RawArtifactKey> for ArtifactKey {
    type Error = String;

    fn try_from(raw: RawArtifactKey) -> Result<Self, Self::Error> {
        Self::from_parts(raw.video_id, raw.kind, raw.resolution).ok_or_else(|| {
            format!(
                "artifact kind {} {} a resolution",
                raw.kind,
                if raw.resolution.is_some() {
                    "must not carry"
                } else {
                    "requires"
                }
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_enforces_resolution_rule() {
        let video = VideoId::new(1);
        assert!(ArtifactKey::from_parts(video, ArtifactKind::File, Some(720)).is_some());
        assert!(ArtifactKey::from_parts(video, ArtifactKind::File, None).is_none());
        assert!(
            ArtifactKey::from_parts(video, ArtifactKind::StreamingPlaylist, Some(720)).is_none()
        );
        assert!(ArtifactKey::from_parts(video, ArtifactKind::StreamingPlaylist, None).is_some());
    }

    #[test]
    fn deserialize_rejects_playlist_with_resolution() {
        let bad = r#"{"video_id":1,"kind":"streaming-playlist","resolution":480}"#;
        assert!(serde_json::from_str::<ArtifactKey>(bad).is_err());

        let good = r#"{"video_id":1,"kind":"file","resolution":480}"#;
        let key: ArtifactKey = serde_json::from_str(good).unwrap();
        assert_eq!(key, ArtifactKey::file(VideoId::new(1), 480));
    }

    #[test]
    fn display_includes_resolution_for_files() {
        let key = ArtifactKey::file(VideoId::new(4), 1080);
        assert_eq!(key.to_string(), "video:4/file@1080p");
        let playlist = ArtifactKey::streaming_playlist(VideoId::new(4));
        assert_eq!(playlist.to_string(), "video:4/streaming-playlist");
    }
}
