//! Wire framing for inbound text lines

pub mod tokenizer;

pub use tokenizer::LineTokenizer;
