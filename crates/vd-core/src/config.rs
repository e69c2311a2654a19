//! Layout configuration: gaps, intrinsic node sizes, engine spacing, timeout.

use crate::error::ConfigError;
use crate::model::{Node, NodeType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayoutConfig {
    /// Gap between a hint-positioned node and its reference box.
    pub hint_gap: f32,
    pub default_width: f32,
    pub default_height: f32,
    pub circle_size: f32,
    pub text_char_width: f32,
    pub text_height: f32,
    pub note_width: f32,
    pub note_height: f32,
    /// Minimum size of an empty frame.
    pub frame_min_width: f32,
    pub frame_min_height: f32,
    /// Built-in engine: horizontal gap between siblings in one layer.
    pub node_spacing: f32,
    /// Built-in engine: vertical gap between layers.
    pub layer_spacing: f32,
    pub frame_padding: f32,
    /// Space reserved for the frame title above its contents.
    pub frame_header: f32,
    pub timeout_ms: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            hint_gap: 20.0,
            default_width: 160.0,
            default_height: 60.0,
            circle_size: 80.0,
            text_char_width: 8.0,
            text_height: 24.0,
            note_width: 160.0,
            note_height: 100.0,
            frame_min_width: 200.0,
            frame_min_height: 120.0,
            node_spacing: 40.0,
            layer_spacing: 80.0,
            frame_padding: 24.0,
            frame_header: 32.0,
            timeout_ms: 10_000,
        }
    }
}

impl LayoutConfig {
    /// Parse a JSON config; absent fields keep their defaults.
    ///
    /// # Errors
    /// Malformed JSON, or a negative/non-finite size.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("hintGap", self.hint_gap),
            ("defaultWidth", self.default_width),
            ("defaultHeight", self.default_height),
            ("circleSize", self.circle_size),
            ("textCharWidth", self.text_char_width),
            ("textHeight", self.text_height),
            ("noteWidth", self.note_width),
            ("noteHeight", self.note_height),
            ("frameMinWidth", self.frame_min_width),
            ("frameMinHeight", self.frame_min_height),
            ("nodeSpacing", self.node_spacing),
            ("layerSpacing", self.layer_spacing),
            ("framePadding", self.frame_padding),
            ("frameHeader", self.frame_header),
        ];
        for (field, value) in sizes {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    rule: "a finite, non-negative number",
                });
            }
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "timeoutMs",
                rule: "greater than zero",
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The size a node asks the layout engine for. Frames are sized by the
    /// engine from their contents; this is their minimum.
    pub fn intrinsic_size(&self, node: &Node) -> (f32, f32) {
        match node.node_type {
            NodeType::Frame => (self.frame_min_width, self.frame_min_height),
            NodeType::Circle | NodeType::Person => (self.circle_size, self.circle_size),
            NodeType::Note => (self.note_width, self.note_height),
            NodeType::Text => {
                // Rough estimate until real text metrics are available.
                let chars = node.label.chars().count().max(1) as f32;
                (chars * self.text_char_width, self.text_height)
            }
            _ => (self.default_width, self.default_height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = LayoutConfig::from_json_str(r#"{"hintGap": 12, "timeoutMs": 500}"#).unwrap();
        assert_eq!(config.hint_gap, 12.0);
        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert_eq!(config.default_width, 160.0);
    }

    #[test]
    fn rejects_negative_sizes() {
        assert!(matches!(
            LayoutConfig::from_json_str(r#"{"nodeSpacing": -1}"#),
            Err(ConfigError::Invalid { field: "nodeSpacing", .. })
        ));
        assert!(LayoutConfig::from_json_str(r#"{"timeoutMs": 0}"#).is_err());
        assert!(LayoutConfig::from_json_str("{").is_err());
    }

    #[test]
    fn text_size_tracks_label_length() {
        let config = LayoutConfig::default();
        let text = Node::new(NodeId::intern("caption"), "hello", NodeType::Text);
        assert_eq!(config.intrinsic_size(&text), (40.0, 24.0));
        let db = Node::new(NodeId::intern("db"), "Users", NodeType::Database);
        assert_eq!(config.intrinsic_size(&db), (160.0, 60.0));
    }
}
