//! Channel addressing.

use serde::{Deserialize, Serialize};

/// Which channels a pause/unpause request applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelTarget {
    /// Every one-shot and streaming channel.
    All,
    /// A single one-shot channel.
    OneShot(usize),
    /// A single streaming channel, indexed from zero within the streaming half.
    Streaming(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_target_serde() {
        let json = serde_json::to_string(&ChannelTarget::Streaming(2)).unwrap();
        assert_eq!(json, r#"{"streaming":2}"#);
        let back: ChannelTarget = serde_json::from_str(r#""all""#).unwrap();
        assert_eq!(back, ChannelTarget::All);
    }
}
