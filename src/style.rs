//! Style resolution: (topic, kind, inline color) → visual parameters.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::geometry::GeometryKind;

/// 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub u32);

impl Color {
    pub const WHITE: Color = Color(0xFF_FF_FF);

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color(u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b))
    }

    /// Parse `#rrggbb` or `0xrrggbb`.  Anything else is rejected.
    pub fn parse_hex(s: &str) -> Option<Color> {
        let s = s.trim();
        let digits = s
            .strip_prefix('#')
            .or_else(|| s.strip_prefix("0x"))
            .or_else(|| s.strip_prefix("0X"))?;
        if digits.is_empty() || digits.len() > 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        // `#` demands the full six digits; `0x` is a plain hex literal.
        if s.starts_with('#') && digits.len() != 6 {
            return None;
        }
        u32::from_str_radix(digits, 16).ok().map(Color)
    }

    /// Interpret a `color` property: hex string or number.
    pub fn from_value(v: &Value) -> Option<Color> {
        match v {
            Value::String(s) => Color::parse_hex(s),
            Value::Number(n) => n
                .as_u64()
                .filter(|c| *c <= 0xFF_FF_FF)
                .map(|c| Color(c as u32)),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

/// Draw-time parameters handed to a render backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
    pub color: Color,
    pub line_width: f32,
    pub fill_opacity: f32,
    pub point_radius: f32,
}

/// Static style tables, passed in at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleConfig {
    pub kind_colors: HashMap<GeometryKind, Color>,
    pub topic_colors: HashMap<String, Color>,
    pub fallback: Color,
}

impl Default for StyleConfig {
    fn default() -> Self {
        let kind_colors = HashMap::from([
            (GeometryKind::Point,           Color(0xFF_44_44)),
            (GeometryKind::MultiPoint,      Color(0xFF_44_44)),
            (GeometryKind::LineString,      Color(0xFF_D7_00)),
            (GeometryKind::MultiLineString, Color(0xFF_D7_00)),
            (GeometryKind::Polygon,         Color(0x00_C8_53)),
            (GeometryKind::MultiPolygon,    Color(0x00_C8_53)),
        ]);
        StyleConfig {
            kind_colors,
            topic_colors: HashMap::new(),
            fallback: Color::WHITE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StyleResolver {
    cfg: StyleConfig,
}

impl StyleResolver {
    pub fn new(cfg: StyleConfig) -> Self {
        StyleResolver { cfg }
    }

    /// Topic override, then per-kind default, then the fallback.
    pub fn resolve(&self, topic: &str, kind: GeometryKind) -> Style {
        let color = self
            .cfg
            .topic_colors
            .get(topic)
            .or_else(|| self.cfg.kind_colors.get(&kind))
            .copied()
            .unwrap_or(self.cfg.fallback);
        Style { color, ..base_style(kind) }
    }

    /// As [`resolve`](Self::resolve), but a valid inline color from the
    /// payload takes precedence over every table.
    pub fn resolve_with_inline(&self, topic: &str, kind: GeometryKind, inline: Option<Color>) -> Style {
        let style = self.resolve(topic, kind);
        match inline {
            Some(color) => Style { color, ..style },
            None => style,
        }
    }
}

fn base_style(kind: GeometryKind) -> Style {
    let (line_width, fill_opacity) = match kind {
        GeometryKind::Polygon | GeometryKind::MultiPolygon => (1.0, 0.35),
        GeometryKind::LineString | GeometryKind::MultiLineString => (2.0, 0.0),
        GeometryKind::Point | GeometryKind::MultiPoint => (1.0, 1.0),
        GeometryKind::GeometryCollection
        | GeometryKind::Feature
        | GeometryKind::FeatureCollection => (1.5, 0.35),
    };
    Style { color: Color::WHITE, line_width, fill_opacity, point_radius: 4.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hex_color_forms() {
        assert_eq!(Color::parse_hex("#ff0000"), Some(Color(0xFF0000)));
        assert_eq!(Color::parse_hex("0x00ff00"), Some(Color(0x00FF00)));
        assert_eq!(Color::parse_hex("0xff"), Some(Color(0xFF)));
        assert_eq!(Color::parse_hex("#fff"), None);
        assert_eq!(Color::parse_hex("red"), None);
        assert_eq!(Color::parse_hex("rgb(1,2,3)"), None);
    }

    #[test]
    fn color_from_property_value() {
        assert_eq!(Color::from_value(&json!("#0000ff")), Some(Color(0x0000FF)));
        assert_eq!(Color::from_value(&json!(16711680)), Some(Color(0xFF0000)));
        assert_eq!(Color::from_value(&json!(-1)), None);
        assert_eq!(Color::from_value(&json!([255, 0, 0])), None);
        assert_eq!(Color::from_value(&json!(null)), None);
    }

    #[test]
    fn display_is_lowercase_hash_form() {
        assert_eq!(Color::rgb(0x12, 0xAB, 0x0F).to_string(), "#12ab0f");
    }

    #[test]
    fn topic_override_beats_kind_default() {
        let mut cfg = StyleConfig::default();
        cfg.topic_colors.insert("lane_boundary".into(), Color(0x123456));
        let r = StyleResolver::new(cfg);
        assert_eq!(r.resolve("lane_boundary", GeometryKind::LineString).color, Color(0x123456));
        assert_eq!(r.resolve("other", GeometryKind::LineString).color, Color(0xFFD700));
    }

    #[test]
    fn fallback_when_no_table_matches() {
        let r = StyleResolver::new(StyleConfig { fallback: Color(0x010203), ..StyleConfig::default() });
        assert_eq!(r.resolve("t", GeometryKind::FeatureCollection).color, Color(0x010203));
    }

    #[test]
    fn inline_color_wins() {
        let mut cfg = StyleConfig::default();
        cfg.topic_colors.insert("t".into(), Color(0x111111));
        let r = StyleResolver::new(cfg);
        let s = r.resolve_with_inline("t", GeometryKind::Polygon, Some(Color(0xABCDEF)));
        assert_eq!(s.color, Color(0xABCDEF));
        assert_eq!(s.fill_opacity, 0.35);
        assert_eq!(r.resolve_with_inline("t", GeometryKind::Polygon, None).color, Color(0x111111));
    }
}
