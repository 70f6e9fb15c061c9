use std::collections::HashMap;

use tokenizers::models::wordlevel::WordLevel;
use tokenizers::pre_tokenizers::whitespace::Whitespace;
use tokenizers::Tokenizer;

use crate::model::Gpt2Config;

pub const WORDS: [&str; 18] = [
    "<|endoftext|>",
    "[UNK]",
    "the",
    "quick",
    "brown",
    "fox",
    "jumps",
    "over",
    "lazy",
    "dog",
    "a",
    "cat",
    "sat",
    "on",
    "mat",
    "hello",
    "world",
    ".",
];

/// Word level tokenizer over [`WORDS`], with `<|endoftext|>` at id 0.
pub fn tiny_tokenizer() -> Tokenizer {
    let vocab: HashMap<String, u32> = WORDS
        .iter()
        .enumerate()
        .map(|(i, w)| (w.to_string(), i as u32))
        .collect();
    let model = WordLevel::builder()
        .vocab(vocab)
        .unk_token("[UNK]".to_string())
        .build()
        .unwrap();
    let mut tokenizer = Tokenizer::new(model);
    tokenizer.with_pre_tokenizer(Some(Whitespace::default()));
    tokenizer
}

pub fn tiny_config() -> Gpt2Config {
    Gpt2Config {
        vocab_size: WORDS.len(),
        n_positions: 16,
        n_embd: 16,
        n_layer: 2,
        n_head: 2,
        layer_norm_epsilon: 1e-5,
        n_inner: None,
    }
}
