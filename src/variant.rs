//! Variant generation
//!
//! Encodes the input once per (codec, quality) pair. The quality ladder
//! splits 1..=100 into evenly spaced steps and always includes a low floor
//! sample; codecs with a real lossless mode get one extra lossless variant.
//!
//! A failed encode only loses that one variant. The batch keeps going.

use crate::tools::ImageTools;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, info_span, warn};

/// Lowest quality sampled regardless of step count. 0 destroys most images
/// beyond anything informative.
pub const FLOOR_QUALITY: u8 = 5;

/// Quality value written to the table for lossless variants
pub const LOSSLESS_SENTINEL: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Webp,
    Jpeg,
}

impl Codec {
    pub const ALL: [Codec; 2] = [Codec::Webp, Codec::Jpeg];

    /// Lowercase identifier used in the table and in chart legends
    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Webp => "webp",
            Codec::Jpeg => "jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Codec::Webp => "webp",
            Codec::Jpeg => "jpg",
        }
    }

    pub fn supports_lossless(self) -> bool {
        matches!(self, Codec::Webp)
    }

    /// Encoder flags for a setting, as recorded in the `params` column.
    ///
    /// JPEG has no lossless mode; asking for one yields its maximum quality.
    pub fn encoder_params(self, setting: QualitySetting) -> Vec<String> {
        match (self, setting) {
            (Codec::Webp, QualitySetting::Lossy(q)) => vec!["-q".to_string(), q.to_string()],
            (Codec::Webp, QualitySetting::Lossless) => vec!["-lossless".to_string()],
            (Codec::Jpeg, setting) => {
                vec!["-quality".to_string(), setting.quality_value().to_string()]
            }
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown format '{0}'")]
pub struct UnknownCodec(pub String);

impl FromStr for Codec {
    type Err = UnknownCodec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webp" => Ok(Codec::Webp),
            "jpeg" | "jpg" => Ok(Codec::Jpeg),
            _ => Err(UnknownCodec(s.to_string())),
        }
    }
}

/// Resolve requested format names, skipping (and logging) unknown ones and
/// dropping duplicates while keeping the requested order.
pub fn resolve_formats<S: AsRef<str>>(requested: &[S]) -> Vec<Codec> {
    let mut codecs = Vec::new();
    for name in requested {
        match name.as_ref().parse::<Codec>() {
            Ok(codec) if !codecs.contains(&codec) => codecs.push(codec),
            Ok(_) => {}
            Err(e) => warn!("skipping {}", e),
        }
    }
    codecs
}

/// How a variant was encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualitySetting {
    /// Lossy encode at the given quality (1..=100)
    Lossy(u8),
    /// The codec's dedicated lossless mode
    Lossless,
}

impl QualitySetting {
    /// Numeric value for the `quality` column. Lossless maps to
    /// [`LOSSLESS_SENTINEL`].
    pub fn quality_value(self) -> u8 {
        match self {
            QualitySetting::Lossy(q) => q,
            QualitySetting::Lossless => LOSSLESS_SENTINEL,
        }
    }

    pub fn is_lossless(self) -> bool {
        matches!(self, QualitySetting::Lossless)
    }

    /// File name fragment: `q50` or `lossless`
    pub fn label(self) -> String {
        match self {
            QualitySetting::Lossy(q) => format!("q{}", q),
            QualitySetting::Lossless => "lossless".to_string(),
        }
    }
}

impl fmt::Display for QualitySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualitySetting::Lossy(q) => write!(f, "Q{}", q),
            QualitySetting::Lossless => f.write_str("lossless"),
        }
    }
}

/// One successfully encoded variant
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDescriptor {
    pub path: PathBuf,
    pub codec: Codec,
    pub setting: QualitySetting,
    /// Exact encoder flags, space separated
    pub params: String,
}

impl VariantDescriptor {
    pub fn format(&self) -> &'static str {
        self.codec.as_str()
    }

    pub fn quality(&self) -> u8 {
        self.setting.quality_value()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Quality values to sample for `steps` steps.
///
/// Values are `100 / steps` apart, starting at that increment and never
/// exceeding 100, with [`FLOOR_QUALITY`] prepended unless already present.
/// `steps` is clamped to 1..=100.
pub fn quality_ladder(steps: u32) -> Vec<u8> {
    let steps = steps.clamp(1, 100);
    let increment = (100 / steps) as usize;

    let mut ladder: Vec<u8> = (increment..=100)
        .step_by(increment)
        .map(|q| q as u8)
        .collect();

    if !ladder.contains(&FLOOR_QUALITY) {
        ladder.insert(0, FLOOR_QUALITY);
    }
    ladder
}

/// Deterministic output name: `<stem>_q<N>.<ext>` or `<stem>_lossless.<ext>`
pub fn variant_file_name(stem: &str, codec: Codec, setting: QualitySetting) -> String {
    format!("{}_{}.{}", stem, setting.label(), codec.extension())
}

/// Settings to encode for one codec, in encode order
pub fn settings_for(codec: Codec, ladder: &[u8]) -> Vec<QualitySetting> {
    let mut settings: Vec<QualitySetting> =
        ladder.iter().map(|&q| QualitySetting::Lossy(q)).collect();
    if codec.supports_lossless() {
        settings.push(QualitySetting::Lossless);
    }
    settings
}

pub struct VariantGenerator<'a> {
    tools: &'a dyn ImageTools,
}

impl<'a> VariantGenerator<'a> {
    pub fn new(tools: &'a dyn ImageTools) -> Self {
        Self { tools }
    }

    /// Encode `input` for every codec and ladder step, writing into
    /// `output_dir`. Returns only the variants that were actually produced.
    pub fn generate(
        &self,
        input: &Path,
        output_dir: &Path,
        codecs: &[Codec],
        steps: u32,
    ) -> Vec<VariantDescriptor> {
        let ladder = quality_ladder(steps);
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        let mut variants = Vec::new();
        for &codec in codecs {
            let _span = info_span!("encode", format = %codec).entered();

            for setting in settings_for(codec, &ladder) {
                let name = variant_file_name(&stem, codec, setting);
                let path = output_dir.join(&name);

                info!("compressing {} {}", codec, setting);
                match self.tools.encode(codec, input, setting, &path) {
                    Ok(()) if path.exists() => variants.push(VariantDescriptor {
                        path,
                        codec,
                        setting,
                        params: codec.encoder_params(setting).join(" "),
                    }),
                    Ok(()) => error!("encoder reported success but {} was not written", name),
                    Err(e) => error!("failed to compress {}: {}", name, e),
                }
            }
        }
        variants
    }
}
