use anyhow::{anyhow, ensure};
use candle_core::{Device, IndexOp, Tensor};
use candle_transformers::generation::LogitsProcessor;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::config::GenerateConfig;
use crate::hub::eos_token_id;
use crate::model::Gpt2;

/// Samples a continuation of `cfg.prompt` and returns the prompt followed by it.
///
/// Stops after `max_new_tokens` or at the end of text token. The context fed to
/// the model is cropped to its last `n_positions` tokens.
pub fn generate(
    model: &Gpt2,
    tokenizer: &Tokenizer,
    device: &Device,
    cfg: &GenerateConfig,
) -> anyhow::Result<String> {
    ensure!(!cfg.prompt.is_empty(), "prompt is empty");
    let mut tokens = tokenizer
        .encode(cfg.prompt.as_str(), false)
        .map_err(|e| anyhow!("tokenizing prompt: {e}"))?
        .get_ids()
        .to_vec();
    ensure!(!tokens.is_empty(), "prompt produced no tokens");

    let temperature = (cfg.temperature > 0.).then_some(cfg.temperature);
    let mut logits_processor = LogitsProcessor::new(cfg.seed, temperature, cfg.top_p);
    let eos = eos_token_id(tokenizer);
    let context_size = model.config().n_positions;

    let mut generated = Vec::with_capacity(cfg.max_new_tokens);
    for _ in 0..cfg.max_new_tokens {
        let start = tokens.len().saturating_sub(context_size);
        let context = &tokens[start..];
        let input = Tensor::new(context, device)?.unsqueeze(0)?;
        let logits = model.forward(&input, None)?;
        let logits = logits.i((0, context.len() - 1))?;

        let next = logits_processor.sample(&logits)?;
        if Some(next) == eos {
            debug!("end of text reached");
            break;
        }
        tokens.push(next);
        generated.push(next);
    }

    let continuation = tokenizer
        .decode(&generated, true)
        .map_err(|e| anyhow!("decoding generated tokens: {e}"))?;
    Ok(format!("{}{}", cfg.prompt, continuation))
}
