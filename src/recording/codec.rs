//! Recording codec negotiation.

/// Media types tried in order, most preferred first.
pub const CODEC_CANDIDATES: [&str; 5] = [
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm",
    "video/mp4;codecs=avc1",
    "video/mp4",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedCodec {
    pub mime_type: String,
    /// File extension for the uploaded recording: `mp4` or `webm`.
    pub extension: &'static str,
}

impl NegotiatedCodec {
    pub fn new(mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            extension: extension_for(mime_type),
        }
    }
}

pub fn extension_for(mime_type: &str) -> &'static str {
    if mime_type.contains("mp4") {
        "mp4"
    } else {
        "webm"
    }
}

/// First candidate the recorder accepts, or `None` when nothing is supported.
pub fn negotiate(is_supported: impl Fn(&str) -> bool) -> Option<NegotiatedCodec> {
    CODEC_CANDIDATES
        .iter()
        .find(|mime| is_supported(mime))
        .map(|mime| NegotiatedCodec::new(mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_vp9_webm() {
        let codec = negotiate(|_| true).unwrap();
        assert_eq!(codec.mime_type, "video/webm;codecs=vp9");
        assert_eq!(codec.extension, "webm");
    }

    #[test]
    fn falls_back_to_mp4() {
        let codec = negotiate(|mime| mime.starts_with("video/mp4")).unwrap();
        assert_eq!(codec.mime_type, "video/mp4;codecs=avc1");
        assert_eq!(codec.extension, "mp4");
    }

    #[test]
    fn nothing_supported() {
        assert!(negotiate(|_| false).is_none());
    }
}
