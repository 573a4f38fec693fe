pub mod chunk;
pub mod copydata;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod progress;
pub mod sink;
pub mod statement;
pub mod tokenizer;
