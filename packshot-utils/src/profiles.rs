//! Output profile definitions (`output_profiles.json`).
//!
//! A profile names a bundle of target canvases, the formats to encode them in and the padding
//! rule to apply. Profiles are keyed by name; the file order is kept because it is both the
//! display order and the order in which exports run. Fields this version does not know about
//! are carried through load/save untouched.

use anyhow::{Context, Result};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::{collections::HashSet, fmt, fs, path::Path, str::FromStr};

use crate::color::{RgbaColor, parse_hex_color};

/// Default profile file name, relative to the working directory.
pub const DEFAULT_PROFILES_FILE: &str = "output_profiles.json";

/// Encoded output kinds a profile can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "jpg", alias = "jpeg")]
    Jpg,
    #[serde(rename = "png")]
    Png,
    #[serde(rename = "psd")]
    Psd,
}

impl OutputFormat {
    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Psd => "psd",
        }
    }

    /// `true` for single-raster formats, `false` for the layered document.
    pub fn is_raster(self) -> bool {
        !matches!(self, OutputFormat::Psd)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            "psd" => Ok(OutputFormat::Psd),
            other => Err(format!(
                "unknown output format '{other}'; expected jpg, png or psd"
            )),
        }
    }
}

/// Fill used for the uncovered border of letterboxed canvases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PadColorRepr", into = "PadColorRepr")]
pub enum PadColor {
    White,
    Transparent,
    Rgb(u8, u8, u8),
}

impl PadColor {
    pub fn to_rgba_color(self) -> RgbaColor {
        match self {
            PadColor::White => RgbaColor::WHITE,
            PadColor::Transparent => RgbaColor::TRANSPARENT,
            PadColor::Rgb(r, g, b) => RgbaColor::opaque(r, g, b),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PadColorRepr {
    Named(String),
    Channels([u8; 3]),
}

impl TryFrom<PadColorRepr> for PadColor {
    type Error = String;

    fn try_from(repr: PadColorRepr) -> Result<Self, Self::Error> {
        match repr {
            PadColorRepr::Channels([r, g, b]) => Ok(PadColor::Rgb(r, g, b)),
            PadColorRepr::Named(name) => match name.trim().to_ascii_lowercase().as_str() {
                "white" => Ok(PadColor::White),
                "transparent" => Ok(PadColor::Transparent),
                other => parse_hex_color(other)
                    .filter(|c| c.alpha == 255)
                    .map(|c| PadColor::Rgb(c.red, c.green, c.blue))
                    .ok_or_else(|| {
                        format!(
                            "invalid pad color '{name}'; \
                             expected white, transparent, #rrggbb or [r, g, b]"
                        )
                    }),
            },
        }
    }
}

impl From<PadColor> for PadColorRepr {
    fn from(color: PadColor) -> Self {
        match color {
            PadColor::White => PadColorRepr::Named("white".into()),
            PadColor::Transparent => PadColorRepr::Named("transparent".into()),
            PadColor::Rgb(r, g, b) => PadColorRepr::Named(RgbaColor::opaque(r, g, b).to_hex()),
        }
    }
}

/// One fixed-size output canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSize {
    /// Unique within its profile; used in output file names.
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub extra: JsonMap<String, JsonValue>,
}

impl TargetSize {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            extra: JsonMap::new(),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Sizes, formats and padding rule for one named output target.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputProfile {
    #[serde(default)]
    pub sizes: Vec<TargetSize>,
    /// `None` means "not configured" and implies a single JPEG; `Some(vec![])` disables output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<OutputFormat>>,
    #[serde(default, alias = "export_psd", skip_serializing_if = "is_false")]
    pub export_psd: bool,
    /// When set the profile letterboxes (contain fit) instead of cropping (cover fit).
    #[serde(default, alias = "pad_color", skip_serializing_if = "Option::is_none")]
    pub pad_color: Option<PadColor>,
    /// Margin in pixels around the detected product; the batch default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pad: Option<u32>,
    #[serde(flatten)]
    pub extra: JsonMap<String, JsonValue>,
}

impl OutputProfile {
    pub fn new(sizes: Vec<TargetSize>) -> Self {
        Self {
            sizes,
            ..Self::default()
        }
    }

    pub fn with_formats(mut self, formats: Vec<OutputFormat>) -> Self {
        self.formats = Some(formats);
        self
    }

    /// Formats to produce, applying the implicit JPEG default when none are configured.
    pub fn effective_formats(&self) -> Vec<OutputFormat> {
        match &self.formats {
            Some(formats) => formats.clone(),
            None => vec![OutputFormat::Jpg],
        }
    }

    /// Per-profile margin, falling back to `default_pad`.
    pub fn pad_or(&self, default_pad: u32) -> u32 {
        self.pad.unwrap_or(default_pad)
    }

    /// Check size invariants: positive dimensions and unique names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.sizes.len());
        for size in &self.sizes {
            anyhow::ensure!(
                size.width > 0 && size.height > 0,
                "size '{}' must have positive dimensions (got {}x{})",
                size.name,
                size.width,
                size.height
            );
            anyhow::ensure!(
                seen.insert(size.name.as_str()),
                "size name '{}' is declared more than once",
                size.name
            );
        }
        Ok(())
    }
}

/// Ordered mapping of profile key to [`OutputProfile`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfileSet {
    entries: Vec<(String, OutputProfile)>,
}

impl ProfileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, profile: OutputProfile) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = profile,
            None => self.entries.push((key, profile)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OutputProfile> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, profile)| profile)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputProfile)> {
        self.entries
            .iter()
            .map(|(key, profile)| (key.as_str(), profile))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate every profile, naming the offending key on failure.
    pub fn validate(&self) -> Result<()> {
        for (key, profile) in &self.entries {
            profile
                .validate()
                .with_context(|| format!("invalid output profile '{key}'"))?;
        }
        Ok(())
    }

    /// Load and validate a profile file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read profiles file {}", path.display()))?;
        let profiles: ProfileSet = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse profiles JSON at {}", path.display()))?;
        profiles
            .validate()
            .with_context(|| format!("invalid profiles file {}", path.display()))?;
        Ok(profiles)
    }

    /// Serialize profiles to disk in pretty-printed JSON.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize profiles JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write profiles file {}", path.display()))?;
        Ok(())
    }
}

impl FromIterator<(String, OutputProfile)> for ProfileSet {
    fn from_iter<T: IntoIterator<Item = (String, OutputProfile)>>(iter: T) -> Self {
        let mut set = ProfileSet::new();
        for (key, profile) in iter {
            set.insert(key, profile);
        }
        set
    }
}

impl Serialize for ProfileSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, profile) in &self.entries {
            map.serialize_entry(key, profile)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProfileSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProfileSetVisitor;

        impl<'de> Visitor<'de> for ProfileSetVisitor {
            type Value = ProfileSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of profile names to output profiles")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, OutputProfile)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, profile)) = access.next_entry::<String, OutputProfile>()? {
                    if entries.iter().any(|(existing, _)| *existing == key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate profile '{key}'"
                        )));
                    }
                    entries.push((key, profile));
                }
                Ok(ProfileSet { entries })
            }
        }

        deserializer.deserialize_map(ProfileSetVisitor)
    }
}
