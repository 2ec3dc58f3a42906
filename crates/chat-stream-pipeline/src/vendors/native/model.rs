use std::fmt;

/// Model family understood by the native SDK.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NativeModel {
    /// Fallback for any name the SDK does not know.
    #[default]
    Lite,
    Pro,
    Pro128K,
    Max,
    Max32K,
    Ultra,
}

impl NativeModel {
    /// Model used when a name cannot be mapped.
    pub const DEFAULT: NativeModel = NativeModel::Lite;

    /// Maps a configured model name to the SDK enum.
    ///
    /// Matching ignores case and surrounding whitespace and accepts both the
    /// display names and the SDK domain strings. Unknown names map to
    /// [`NativeModel::DEFAULT`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "lite" | "general" | "spark-lite" => Self::Lite,
            "pro" | "generalv3" | "spark-pro" => Self::Pro,
            "pro-128k" | "pro128k" => Self::Pro128K,
            "max" | "generalv3.5" | "spark-max" => Self::Max,
            "max-32k" | "max32k" => Self::Max32K,
            "ultra" | "4.0ultra" | "spark-ultra" => Self::Ultra,
            _ => Self::DEFAULT,
        }
    }

    /// Domain string sent to the SDK.
    pub fn domain(self) -> &'static str {
        match self {
            Self::Lite => "lite",
            Self::Pro => "generalv3",
            Self::Pro128K => "pro-128k",
            Self::Max => "generalv3.5",
            Self::Max32K => "max-32k",
            Self::Ultra => "4.0Ultra",
        }
    }
}

impl fmt::Display for NativeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.domain())
    }
}
