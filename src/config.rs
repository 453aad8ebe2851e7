//! Configuration layer separating CLI arguments from internal
//! configurations.
//!
//! CLI concerns (argument parsing, help text, validation) live in the
//! `clap` structs; processing parameters live in the internal config
//! structs, converted via `from_args`.

use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::Verbosity;

use crate::registry::CatalogParams;

/// Parse probability value (must be between 0.0 and 1.0)
pub fn parse_probability(s: &str) -> Result<f32, String> {
    let val = s
        .parse::<f32>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(0.0..=1.0).contains(&val) {
        return Err(format!("Must be between 0.0 and 1.0, got {val}"));
    }
    Ok(val)
}

/// Global CLI arguments that apply to all endoscan commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Global output directory (overrides default placement next to input)
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Directory containing model weights files
    #[arg(long, default_value = "./models", global = true)]
    pub model_dir: PathBuf,

    /// Device to use for inference (auto, cpu, cuda)
    #[arg(long, default_value = "auto", global = true)]
    pub device: String,

    /// Verbosity level (-q/--quiet, -v/-vv/-vvv/-vvvv for info/debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity,

    /// Use permissive mode for input validation (warn instead of error for
    /// unsupported files)
    #[arg(long, global = true)]
    pub permissive: bool,
}

/// CLI command for scanning images (only command-specific arguments)
#[derive(Parser, Debug, Clone)]
pub struct ScanCommand {
    /// Path(s) to input images or directories
    #[arg(value_name = "IMAGES_OR_DIRS", required = true)]
    pub sources: Vec<String>,

    /// Model to run (see `endoscan models`)
    #[arg(short, long, default_value = "default")]
    pub model: String,

    /// Confidence threshold for the box detector (0.0-1.0)
    #[arg(long, value_parser = parse_probability)]
    pub confidence: Option<f32>,

    /// Instance score threshold for instance segmentation (0.0-1.0)
    #[arg(long, value_parser = parse_probability)]
    pub score_threshold: Option<f32>,

    /// Probability threshold for semantic segmentation (0.0-1.0)
    #[arg(long, value_parser = parse_probability)]
    pub threshold: Option<f32>,

    /// Skip writing the overlay image
    #[arg(long)]
    pub no_overlay: bool,
}

/// CLI command for listing registered models
#[derive(Parser, Debug, Clone)]
pub struct ModelsCommand {
    /// Load every registered model up front and report failures
    #[arg(long)]
    pub preload: bool,
}

/// Internal configuration for scan processing
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub sources: Vec<String>,
    pub model: String,
    pub model_dir: PathBuf,
    pub device: String,
    pub output_dir: Option<PathBuf>,
    /// Use strict mode (fail on missing or unsupported inputs). Opposite of
    /// `--permissive`.
    pub strict: bool,
    pub save_overlay: bool,
    pub params: CatalogParams,
}

impl ScanConfig {
    /// Create configuration from global args and command-specific args
    pub fn from_args(global: GlobalArgs, cmd: ScanCommand) -> Self {
        let mut params = CatalogParams::default();
        if let Some(confidence) = cmd.confidence {
            params.detection.confidence_threshold = confidence;
        }
        if let Some(score_threshold) = cmd.score_threshold {
            params.instance.score_threshold = score_threshold;
        }
        if let Some(threshold) = cmd.threshold {
            params.semantic.threshold = threshold;
        }

        Self {
            sources: cmd.sources,
            model: cmd.model,
            model_dir: global.model_dir,
            device: global.device,
            output_dir: global.output_dir,
            strict: !global.permissive,
            save_overlay: !cmd.no_overlay,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_args(permissive: bool) -> GlobalArgs {
        GlobalArgs {
            output_dir: None,
            model_dir: PathBuf::from("./models"),
            device: "cpu".to_string(),
            verbosity: Verbosity::new(0, 0),
            permissive,
        }
    }

    #[test]
    fn test_scan_command_conversion() {
        let cmd = ScanCommand {
            sources: vec!["frame.jpg".to_string()],
            model: "unet".to_string(),
            confidence: None,
            score_threshold: None,
            threshold: Some(0.9),
            no_overlay: false,
        };

        let config = ScanConfig::from_args(global_args(false), cmd);

        assert_eq!(config.sources, vec!["frame.jpg"]);
        assert_eq!(config.model, "unet");
        assert!(config.strict); // permissive=false -> strict=true
        assert!(config.save_overlay);
        assert_eq!(config.params.semantic.threshold, 0.9);
        // untouched params keep their defaults
        assert_eq!(config.params.detection.confidence_threshold, 0.25);
    }

    #[test]
    fn test_permissive_flag_conversion() {
        let cmd = ScanCommand {
            sources: vec!["dir".to_string()],
            model: "default".to_string(),
            confidence: Some(0.5),
            score_threshold: None,
            threshold: None,
            no_overlay: true,
        };

        let config = ScanConfig::from_args(global_args(true), cmd);
        assert!(!config.strict);
        assert!(!config.save_overlay);
        assert_eq!(config.params.detection.confidence_threshold, 0.5);
    }

    #[test]
    fn test_parse_probability() {
        assert_eq!(parse_probability("0.0"), Ok(0.0));
        assert_eq!(parse_probability("0.5"), Ok(0.5));
        assert_eq!(parse_probability("1.0"), Ok(1.0));

        assert!(parse_probability("-0.5").is_err());
        assert!(parse_probability("2.0").is_err());
        assert!(parse_probability("invalid").is_err());
    }
}
