use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable that, when set to the empty string, hides every accelerator.
pub const VISIBLE_DEVICES_ENV: &str = "CUDA_VISIBLE_DEVICES";

pub const DEFAULT_MODEL: &str = "distilbert/distilgpt2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub model_name: String,
    pub max_length: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub log_every: usize,
    pub seed: u64,
    pub shuffle: bool,
    pub output_dir: PathBuf,
    pub use_cpu: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            max_length: 32,
            batch_size: 2,
            epochs: 3,
            learning_rate: 5e-5,
            weight_decay: 0.0,
            log_every: 1,
            seed: 42,
            shuffle: true,
            output_dir: PathBuf::from("./fine_tuned_model"),
            use_cpu: true,
        }
    }
}

impl TrainConfig {
    /// Reads a JSON file; fields it leaves out keep their default value.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let cfg: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_length > 1, "max_length must be at least 2");
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.learning_rate > 0.0, "learning_rate must be positive");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    pub prompt: String,
    pub max_new_tokens: usize,
    /// `0.0` means greedy decoding.
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub seed: u64,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            prompt: "The quick brown".to_string(),
            max_new_tokens: 20,
            temperature: 0.8,
            top_p: Some(0.95),
            seed: 42,
        }
    }
}

fn accelerators_hidden() -> bool {
    matches!(std::env::var(VISIBLE_DEVICES_ENV), Ok(v) if v.trim().is_empty())
}

/// CPU whenever `use_cpu` is set or accelerators are hidden, else the first
/// CUDA device if one is available.
pub fn select_device(use_cpu: bool) -> candle_core::Result<Device> {
    let device = if use_cpu || accelerators_hidden() {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    info!(device = ?device, "selected device");
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_tutorial_run() {
        let cfg = TrainConfig::default();
        assert_eq!(cfg.epochs, 3);
        assert!(cfg.use_cpu);
        assert_eq!(GenerateConfig::default().prompt, "The quick brown");
        cfg.validate().unwrap();
    }

    #[test]
    fn json_overlay_keeps_missing_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"epochs": 5, "model_name": "openai-community/gpt2"}}"#).unwrap();
        let cfg = TrainConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.epochs, 5);
        assert_eq!(cfg.model_name, "openai-community/gpt2");
        assert_eq!(cfg.batch_size, TrainConfig::default().batch_size);
    }

    #[test]
    fn json_overlay_is_validated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"batch_size": 0}}"#).unwrap();
        assert!(TrainConfig::from_json_file(file.path()).is_err());
    }

    #[test]
    fn cpu_flag_forces_cpu() {
        assert!(select_device(true).unwrap().is_cpu());
    }

    #[test]
    fn hidden_accelerators_force_cpu() {
        std::env::set_var(VISIBLE_DEVICES_ENV, "");
        assert!(accelerators_hidden());
        assert!(select_device(false).unwrap().is_cpu());
    }
}
