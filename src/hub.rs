//! Loading pretrained GPT-2 checkpoints by name and saving fine-tuned ones.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use hf_hub::api::sync::Api;
use tokenizers::Tokenizer;
use tracing::info;

use crate::model::{Gpt2, Gpt2Config};

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// GPT-2 end of text token, also used for padding when the tokenizer has no pad token.
pub const EOS_TOKEN: &str = "<|endoftext|>";

/// Local paths of the three files that make up a checkpoint.
#[derive(Debug, Clone)]
pub struct PretrainedFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl PretrainedFiles {
    /// Resolves `name` either as a local checkpoint directory or as a hub model id.
    pub fn fetch(name: &str) -> Result<Self> {
        let dir = Path::new(name);
        if dir.is_dir() {
            info!(path = %dir.display(), "loading checkpoint from local directory");
            let files = Self {
                config: dir.join(CONFIG_FILE),
                tokenizer: dir.join(TOKENIZER_FILE),
                weights: dir.join(WEIGHTS_FILE),
            };
            for path in [&files.config, &files.tokenizer, &files.weights] {
                if !path.is_file() {
                    bail!("checkpoint file not found: {}", path.display());
                }
            }
            return Ok(files);
        }

        info!(model = name, "fetching pretrained model from the hub");
        let repo = Api::new()?.model(name.to_string());
        Ok(Self {
            config: repo
                .get(CONFIG_FILE)
                .with_context(|| format!("fetching {CONFIG_FILE} for {name}"))?,
            tokenizer: repo
                .get(TOKENIZER_FILE)
                .with_context(|| format!("fetching {TOKENIZER_FILE} for {name}"))?,
            weights: repo
                .get(WEIGHTS_FILE)
                .with_context(|| format!("fetching {WEIGHTS_FILE} for {name}"))?,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Gpt2Config> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("parsing {}", path.display()))
}

pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path).map_err(|e| anyhow!("loading tokenizer {}: {e}", path.display()))
}

/// The tokenizer's pad id, falling back to the end of text token.
pub fn pad_token_id(tokenizer: &Tokenizer) -> Result<u32> {
    if let Some(padding) = tokenizer.get_padding() {
        return Ok(padding.pad_id);
    }
    eos_token_id(tokenizer).ok_or_else(|| anyhow!("tokenizer has neither a pad token nor {EOS_TOKEN}"))
}

pub fn eos_token_id(tokenizer: &Tokenizer) -> Option<u32> {
    tokenizer.token_to_id(EOS_TOKEN)
}

/// Copies every tensor of a safetensors file into the matching variable.
///
/// Hub checkpoints sometimes prefix names with `transformer.`; both spellings
/// are accepted. Returns the number of variables set.
pub fn load_weights(varmap: &VarMap, weights: &Path, device: &Device) -> Result<usize> {
    let tensors = candle_core::safetensors::load(weights, device)
        .with_context(|| format!("reading {}", weights.display()))?;
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("variable map lock poisoned"))?;
    for (name, var) in vars.iter() {
        let tensor = tensors
            .get(name)
            .or_else(|| tensors.get(&format!("transformer.{name}")))
            .ok_or_else(|| anyhow!("pretrained weights have no tensor for `{name}`"))?;
        if tensor.dims() != var.dims() {
            bail!(
                "shape mismatch for `{name}`: checkpoint {:?}, model {:?}",
                tensor.dims(),
                var.dims()
            );
        }
        var.set(&tensor.to_dtype(var.dtype())?)?;
    }
    Ok(vars.len())
}

/// A model together with everything needed to train, run and save it.
pub struct Pretrained {
    pub model: Gpt2,
    pub varmap: VarMap,
    pub config: Gpt2Config,
    pub tokenizer: Tokenizer,
}

impl Pretrained {
    pub fn load(name: &str, device: &Device) -> Result<Self> {
        let files = PretrainedFiles::fetch(name)?;
        let config = load_config(&files.config)?;
        let tokenizer = load_tokenizer(&files.tokenizer)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Gpt2::new(config.clone(), vb)?;
        let count = load_weights(&varmap, &files.weights, device)?;
        info!(
            model = name,
            tensors = count,
            layers = config.n_layer,
            "pretrained weights loaded"
        );

        Ok(Self {
            model,
            varmap,
            config,
            tokenizer,
        })
    }

    /// Writes weights, config and tokenizer so that [`Pretrained::load`] can
    /// read them back from `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        self.varmap.save(dir.join(WEIGHTS_FILE))?;

        let writer = BufWriter::new(File::create(dir.join(CONFIG_FILE))?);
        serde_json::to_writer_pretty(writer, &self.config)?;

        self.tokenizer
            .save(dir.join(TOKENIZER_FILE), true)
            .map_err(|e| anyhow!("saving tokenizer: {e}"))?;
        info!(path = %dir.display(), "checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{tiny_config, tiny_tokenizer};
    use candle_core::Tensor;

    fn random_pretrained() -> Pretrained {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = Gpt2::new(tiny_config(), vb).unwrap();
        Pretrained {
            model,
            varmap,
            config: tiny_config(),
            tokenizer: tiny_tokenizer(),
        }
    }

    #[test]
    fn pad_falls_back_to_eos() {
        let tokenizer = tiny_tokenizer();
        assert_eq!(pad_token_id(&tokenizer).unwrap(), 0);
        assert_eq!(eos_token_id(&tokenizer), Some(0));
    }

    #[test]
    fn save_then_load_round_trips_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let original = random_pretrained();
        original.save(dir.path()).unwrap();

        let name = dir.path().to_str().unwrap();
        let reloaded = Pretrained::load(name, &Device::Cpu).unwrap();
        assert_eq!(reloaded.config, original.config);

        let ids = Tensor::new(&[[2u32, 3, 4]], &Device::Cpu).unwrap();
        let a = original.model.forward(&ids, None).unwrap();
        let b = reloaded.model.forward(&ids, None).unwrap();
        let a: Vec<f32> = a.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = b.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn accepts_transformer_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let source = random_pretrained();
        let prefixed: std::collections::HashMap<String, Tensor> = source
            .varmap
            .data()
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (format!("transformer.{k}"), v.as_tensor().clone()))
            .collect();
        let path = dir.path().join(WEIGHTS_FILE);
        candle_core::safetensors::save(&prefixed, &path).unwrap();

        let target = random_pretrained();
        let count = load_weights(&target.varmap, &path, &Device::Cpu).unwrap();
        assert_eq!(count, prefixed.len());
    }

    fn saved_tensors(source: &Pretrained) -> std::collections::HashMap<String, Tensor> {
        source
            .varmap
            .data()
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.as_tensor().clone()))
            .collect()
    }

    #[test]
    fn missing_tensor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut tensors = saved_tensors(&random_pretrained());
        tensors.remove("ln_f.bias");
        let path = dir.path().join(WEIGHTS_FILE);
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let err = load_weights(&random_pretrained().varmap, &path, &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("no tensor for `ln_f.bias`"), "{err}");
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut tensors = saved_tensors(&random_pretrained());
        tensors.insert(
            "ln_f.bias".to_string(),
            Tensor::zeros(3, DType::F32, &Device::Cpu).unwrap(),
        );
        let path = dir.path().join(WEIGHTS_FILE);
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let err = load_weights(&random_pretrained().varmap, &path, &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("shape mismatch for `ln_f.bias`"), "{err}");
    }

    #[test]
    fn missing_local_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = PretrainedFiles::fetch(dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("checkpoint file not found"));
    }
}
