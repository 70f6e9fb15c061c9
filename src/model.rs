use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{init::Init, ops, Embedding, VarBuilder};
use serde::{Deserialize, Serialize};

/// Large negative bias added to attention scores that must not be attended.
const MASK_BIAS: f64 = -1e9;

/// Label value ignored by the loss.
pub const IGNORE_INDEX: i64 = -100;

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

/// Hyper-parameters of a GPT-2 checkpoint, as found in its `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gpt2Config {
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    #[serde(default)]
    pub n_inner: Option<usize>,
}

impl Default for Gpt2Config {
    /// distilgpt2
    fn default() -> Self {
        Self {
            vocab_size: 50257,
            n_positions: 1024,
            n_embd: 768,
            n_layer: 6,
            n_head: 12,
            layer_norm_epsilon: default_layer_norm_epsilon(),
            n_inner: None,
        }
    }
}

impl Gpt2Config {
    fn inner_dim(&self) -> usize {
        self.n_inner.unwrap_or(4 * self.n_embd)
    }
}

/// GPT-2 style linear layer: weight is stored as `[in, out]`.
struct Conv1D {
    weight: Tensor,
    bias: Tensor,
}

impl Conv1D {
    fn new(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            (in_dim, out_dim),
            "weight",
            Init::Randn {
                mean: 0.,
                stdev: 0.02,
            },
        )?;
        let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.))?;
        Ok(Self { weight, bias })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        x.broadcast_matmul(&self.weight)?.broadcast_add(&self.bias)
    }
}

/// Layer norm written with plain tensor ops so that it can be trained.
struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(dim, "weight", Init::Const(1.))?;
        let bias = vb.get_with_hints(dim, "bias", Init::Const(0.))?;
        Ok(Self { weight, bias, eps })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&var.affine(1., self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

struct CausalSelfAttention {
    c_attn: Conv1D,
    c_proj: Conv1D,
    n_head: usize,
    n_embd: usize,
}

impl CausalSelfAttention {
    fn new(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let c_attn = Conv1D::new(cfg.n_embd, 3 * cfg.n_embd, vb.pp("c_attn"))?;
        let c_proj = Conv1D::new(cfg.n_embd, cfg.n_embd, vb.pp("c_proj"))?;
        Ok(Self {
            c_attn,
            c_proj,
            n_head: cfg.n_head,
            n_embd: cfg.n_embd,
        })
    }

    fn split_heads(&self, x: &Tensor, b: usize, t: usize) -> Result<Tensor> {
        x.reshape((b, t, self.n_head, self.n_embd / self.n_head))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// `bias` is broadcastable to `[b, n_head, t, t]`.
    fn forward(&self, x: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let (b, t, c) = x.dims3()?;
        let qkv = self.c_attn.forward(x)?;
        let q = self.split_heads(&qkv.narrow(D::Minus1, 0, c)?, b, t)?;
        let k = self.split_heads(&qkv.narrow(D::Minus1, c, c)?, b, t)?;
        let v = self.split_heads(&qkv.narrow(D::Minus1, 2 * c, c)?, b, t)?;

        let scale = 1. / ((c / self.n_head) as f64).sqrt();
        let att = q
            .matmul(&k.t()?.contiguous()?)?
            .affine(scale, 0.)?
            .broadcast_add(bias)?;
        let att = ops::softmax(&att, D::Minus1)?;
        let y = att
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, c))?;
        self.c_proj.forward(&y)
    }
}

struct Mlp {
    c_fc: Conv1D,
    c_proj: Conv1D,
}

impl Mlp {
    fn new(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let c_fc = Conv1D::new(cfg.n_embd, cfg.inner_dim(), vb.pp("c_fc"))?;
        let c_proj = Conv1D::new(cfg.inner_dim(), cfg.n_embd, vb.pp("c_proj"))?;
        Ok(Self { c_fc, c_proj })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // gelu is the tanh approximation, which is what GPT-2 was trained with
        self.c_proj.forward(&self.c_fc.forward(x)?.gelu()?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: CausalSelfAttention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn new(cfg: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let ln_1 = LayerNorm::new(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_1"))?;
        let attn = CausalSelfAttention::new(cfg, vb.pp("attn"))?;
        let ln_2 = LayerNorm::new(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_2"))?;
        let mlp = Mlp::new(cfg, vb.pp("mlp"))?;
        Ok(Self {
            ln_1,
            attn,
            ln_2,
            mlp,
        })
    }

    fn forward(&self, x: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let x = self.attn.forward(&self.ln_1.forward(x)?, bias)?.add(x)?;
        self.mlp.forward(&self.ln_2.forward(&x)?)?.add(&x)
    }
}

/// GPT-2 language model with the LM head tied to the token embedding.
///
/// Variable names follow the Hugging Face checkpoints (`wte`, `wpe`, `h.{i}.*`,
/// `ln_f`) so pretrained weights can be copied straight into the var map.
pub struct Gpt2 {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    config: Gpt2Config,
}

impl Gpt2 {
    pub fn new(config: Gpt2Config, vb: VarBuilder) -> Result<Self> {
        if config.n_head == 0 || config.n_embd % config.n_head != 0 {
            candle_core::bail!(
                "n_embd ({}) must be a multiple of n_head ({})",
                config.n_embd,
                config.n_head
            );
        }
        let init = Init::Randn {
            mean: 0.,
            stdev: 0.02,
        };
        let wte = vb.pp("wte").get_with_hints(
            (config.vocab_size, config.n_embd),
            "weight",
            init,
        )?;
        let wpe = vb.pp("wpe").get_with_hints(
            (config.n_positions, config.n_embd),
            "weight",
            init,
        )?;
        let blocks = (0..config.n_layer)
            .map(|i| Block::new(&config, vb.pp(format!("h.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = LayerNorm::new(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_f"))?;

        Ok(Self {
            wte: Embedding::new(wte, config.n_embd),
            wpe: Embedding::new(wpe, config.n_embd),
            blocks,
            ln_f,
            config,
        })
    }

    pub fn config(&self) -> &Gpt2Config {
        &self.config
    }

    /// Returns logits of shape `[batch, seq_len, vocab_size]`.
    ///
    /// `attention_mask` (`[batch, seq_len]`, 1 for real tokens, 0 for padding)
    /// hides padded keys on top of the causal mask.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let (b, t) = input_ids.dims2()?;
        if t > self.config.n_positions {
            candle_core::bail!(
                "sequence length {t} exceeds the model context of {} positions",
                self.config.n_positions
            );
        }
        let device = input_ids.device();

        let positions = Tensor::arange(0u32, t as u32, device)?;
        let mut h = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;

        let mut bias = causal_bias(t, device)?.reshape((1, 1, t, t))?;
        if let Some(mask) = attention_mask {
            let padding = mask
                .to_dtype(DType::F32)?
                .affine(-MASK_BIAS, MASK_BIAS)?
                .reshape((b, 1, 1, t))?;
            bias = bias.broadcast_add(&padding)?;
        }

        for block in self.blocks.iter() {
            h = block.forward(&h, &bias)?;
        }
        let h = self.ln_f.forward(&h)?;
        h.broadcast_matmul(&self.wte.embeddings().t()?)
    }
}

fn causal_bias(t: usize, device: &Device) -> Result<Tensor> {
    let bias: Vec<f32> = (0..t)
        .flat_map(|i| (0..t).map(move |j| if j > i { MASK_BIAS as f32 } else { 0. }))
        .collect();
    Tensor::from_vec(bias, (t, t), device)
}

/// Next-token cross entropy: logits at position `i` predict `labels[i + 1]`.
/// Labels equal to [`IGNORE_INDEX`] do not contribute.
pub fn lm_loss(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (b, t, vocab) = logits.dims3()?;
    if t < 2 {
        candle_core::bail!("need at least two positions to compute a language modelling loss");
    }
    let logits = logits.narrow(1, 0, t - 1)?.reshape((b * (t - 1), vocab))?;
    let labels = labels.narrow(1, 1, t - 1)?.reshape(b * (t - 1))?;

    let keep = labels.ge(0i64)?;
    let targets = keep
        .where_cond(&labels, &labels.zeros_like()?)?
        .to_dtype(DType::U32)?;
    let keep = keep.to_dtype(DType::F32)?;
    let count = keep.sum_all()?.to_scalar::<f32>()?;
    if count == 0. {
        candle_core::bail!("batch has no labelled tokens");
    }

    let log_probs = ops::log_softmax(&logits, D::Minus1)?;
    let picked = log_probs.gather(&targets.unsqueeze(1)?, 1)?.squeeze(1)?;
    picked.mul(&keep)?.sum_all()?.affine(-1. / count as f64, 0.)
}
