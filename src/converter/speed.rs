use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Encoder effort for audio/video transcodes. Operator-level, never per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConversionSpeed {
    UltraFast,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    VerySlow,
}

impl ConversionSpeed {
    /// Encoder arguments for the given target extension.
    pub fn to_args(&self, target: &str) -> Vec<String> {
        let mut args = Vec::new();

        match target {
            "mp4" | "mkv" | "mov" => {
                args.push("-preset".to_string());
                args.push(self.x264_preset().to_string());
            }

            "webm" => {
                args.push("-cpu-used".to_string());
                args.push(self.vpx_cpu_used().to_string());
            }

            _ => {}
        };

        args
    }

    fn x264_preset(&self) -> &'static str {
        match self {
            ConversionSpeed::UltraFast => "ultrafast",
            ConversionSpeed::Fast => "fast",
            ConversionSpeed::Medium => "medium",
            ConversionSpeed::Slow => "slow",
            ConversionSpeed::Slower => "slower",
            ConversionSpeed::VerySlow => "veryslow",
        }
    }

    fn vpx_cpu_used(&self) -> i8 {
        match self {
            ConversionSpeed::UltraFast => 5,
            ConversionSpeed::Fast => 4,
            ConversionSpeed::Medium => 2,
            ConversionSpeed::Slow => 1,
            ConversionSpeed::Slower => 0,
            ConversionSpeed::VerySlow => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_config_strings() {
        assert_eq!("VerySlow".parse::<ConversionSpeed>().unwrap(), ConversionSpeed::VerySlow);
        assert_eq!("fast".parse::<ConversionSpeed>().unwrap(), ConversionSpeed::Fast);
        assert!("warp".parse::<ConversionSpeed>().is_err());
    }

    #[test]
    fn audio_targets_take_no_speed_args() {
        assert!(ConversionSpeed::Fast.to_args("mp3").is_empty());
        assert_eq!(ConversionSpeed::Slow.to_args("mp4"), vec!["-preset", "slow"]);
    }
}
