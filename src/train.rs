use anyhow::{bail, ensure, Context};
use candle_core::Device;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::collate::DiagnosticCollator;
use crate::config::TrainConfig;
use crate::data::EncodedExample;
use crate::model::{lm_loss, Gpt2};

/// Losses recorded while training.
#[derive(Debug, Clone, Default)]
pub struct TrainReport {
    /// Mean batch loss of each epoch.
    pub epoch_losses: Vec<f32>,
    pub steps: usize,
}

impl TrainReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_losses.last().copied()
    }
}

pub struct Trainer<'a> {
    model: &'a Gpt2,
    optim: AdamW,
    collator: DiagnosticCollator,
    cfg: TrainConfig,
    device: Device,
    rng: StdRng,
}

impl<'a> Trainer<'a> {
    /// Optimizes every variable of `varmap`, which must be the map `model` was built from.
    pub fn new(
        model: &'a Gpt2,
        varmap: &VarMap,
        cfg: TrainConfig,
        device: Device,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        let params = ParamsAdamW {
            lr: cfg.learning_rate,
            weight_decay: cfg.weight_decay,
            ..Default::default()
        };
        let optim = AdamW::new(varmap.all_vars(), params)?;
        let rng = StdRng::seed_from_u64(cfg.seed);
        Ok(Self {
            model,
            optim,
            collator: DiagnosticCollator::new(),
            cfg,
            device,
            rng,
        })
    }

    /// Runs `epochs` passes over `examples` and returns the recorded losses.
    pub fn train(&mut self, examples: &[EncodedExample]) -> anyhow::Result<TrainReport> {
        ensure!(!examples.is_empty(), "no training examples");
        ensure!(
            examples.iter().any(EncodedExample::has_targets),
            "no example has more than one token to learn from"
        );
        let mut report = TrainReport::default();
        let mut order: Vec<usize> = (0..examples.len()).collect();

        for epoch in 0..self.cfg.epochs {
            if self.cfg.shuffle {
                order.shuffle(&mut self.rng);
            }
            let mut total_loss = 0.0;
            let mut num_batches = 0;

            for chunk in order.chunks(self.cfg.batch_size) {
                let batch_examples: Vec<&EncodedExample> =
                    chunk.iter().map(|&i| &examples[i]).collect();
                if !batch_examples.iter().any(|e| e.has_targets()) {
                    warn!(
                        epoch = epoch + 1,
                        examples = chunk.len(),
                        "skipping batch without labelled tokens"
                    );
                    continue;
                }
                let batch = self
                    .collator
                    .collate(&batch_examples)?
                    .to_device(&self.device)?;

                let logits = self
                    .model
                    .forward(&batch.input_ids, Some(&batch.attention_mask))?;
                let loss = lm_loss(&logits, &batch.labels)?;
                let loss_val = loss.to_scalar::<f32>()?;
                if !loss_val.is_finite() {
                    bail!("loss became {loss_val} at epoch {} step {}", epoch + 1, report.steps + 1);
                }
                self.optim
                    .backward_step(&loss)
                    .with_context(|| format!("optimizer step {}", report.steps + 1))?;

                report.steps += 1;
                total_loss += loss_val;
                num_batches += 1;
                if self.cfg.log_every > 0 && report.steps % self.cfg.log_every == 0 {
                    info!(epoch = epoch + 1, step = report.steps, loss = loss_val, "training loss");
                }
            }

            if num_batches == 0 {
                warn!(epoch = epoch + 1, "epoch had no trainable batch");
                continue;
            }
            let avg_loss = total_loss / num_batches as f32;
            info!(epoch = epoch + 1, loss = avg_loss, "epoch finished");
            report.epoch_losses.push(avg_loss);
        }

        Ok(report)
    }
}
