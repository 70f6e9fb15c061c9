use std::borrow::Borrow;

use candle_core::{Device, Tensor};
use tracing::{error, info};

use crate::data::EncodedExample;

#[derive(thiserror::Error, Debug)]
pub enum CollateError {
    #[error("cannot collate an empty batch")]
    Empty,

    #[error("example {index}: `{field}` has length {found}, expected {expected}")]
    ShapeMismatch {
        index: usize,
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

/// Stacked batch tensors, all of shape `[batch, seq_len]`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn size(&self) -> candle_core::Result<usize> {
        self.input_ids.dim(0)
    }

    pub fn to_device(&self, device: &Device) -> candle_core::Result<Self> {
        Ok(Self {
            input_ids: self.input_ids.to_device(device)?,
            attention_mask: self.attention_mask.to_device(device)?,
            labels: self.labels.to_device(device)?,
        })
    }
}

/// Collator that logs the type and shape of every example before stacking
/// them, which makes shape problems in a training run easy to spot.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticCollator;

impl DiagnosticCollator {
    pub fn new() -> Self {
        Self
    }

    pub fn collate<E: Borrow<EncodedExample>>(&self, examples: &[E]) -> Result<Batch, CollateError> {
        let first: &EncodedExample = examples.first().ok_or(CollateError::Empty)?.borrow();
        let expected = first.len();

        let mut ids = Vec::with_capacity(examples.len());
        let mut masks = Vec::with_capacity(examples.len());
        let mut labels = Vec::with_capacity(examples.len());
        for (index, example) in examples.iter().enumerate() {
            let example: &EncodedExample = example.borrow();
            info!(
                index,
                input_ids = %format!("u32[{}]", example.input_ids.len()),
                attention_mask = %format!("u32[{}]", example.attention_mask.len()),
                labels = %format!("i64[{}]", example.labels.len()),
                "collating example"
            );
            for (field, found) in [
                ("input_ids", example.input_ids.len()),
                ("attention_mask", example.attention_mask.len()),
                ("labels", example.labels.len()),
            ] {
                if found != expected {
                    let err = CollateError::ShapeMismatch {
                        index,
                        field,
                        expected,
                        found,
                    };
                    error!("{err}");
                    return Err(err);
                }
            }
            ids.push(Tensor::new(example.input_ids.as_slice(), &Device::Cpu)?);
            masks.push(Tensor::new(example.attention_mask.as_slice(), &Device::Cpu)?);
            labels.push(Tensor::new(example.labels.as_slice(), &Device::Cpu)?);
        }

        let batch = Batch {
            input_ids: Tensor::stack(&ids, 0)?,
            attention_mask: Tensor::stack(&masks, 0)?,
            labels: Tensor::stack(&labels, 0)?,
        };
        info!(
            input_ids = ?batch.input_ids.shape(),
            attention_mask = ?batch.attention_mask.shape(),
            labels = ?batch.labels.shape(),
            "collated batch"
        );
        Ok(batch)
    }
}
