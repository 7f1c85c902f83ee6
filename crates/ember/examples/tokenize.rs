//! Tokenize example.
//!
//! Loads a `tokenizer.json` from a path or URL and round-trips a string.
//!
//! ```text
//! cargo run --example tokenize -- ./model/tokenizer.json "Hello world"
//! ```

use anyhow::{Context, Result};
use ember::prelude::*;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let location = args.next().context("usage: tokenize <tokenizer.json|url> [text]")?;
    let text = args.next().unwrap_or_else(|| "Hello world".to_string());

    let source = if location.starts_with("http://") || location.starts_with("https://") {
        TokenizerSource::Url(location)
    } else {
        TokenizerSource::Path(PathBuf::from(location))
    };

    let tokenizer = TokenizerHandle::new();
    tokenizer.load(source).await?;

    let ids = tokenizer.encode(&text)?;
    println!("Text:    {text:?}");
    println!("Ids:     {ids:?}");

    let tokens: Vec<String> = {
        let t = tokenizer.get()?;
        ids.iter()
            .map(|&id| t.id_to_token(id).unwrap_or("<?>").to_string())
            .collect()
    };
    println!("Tokens:  {tokens:?}");
    println!("Decoded: {:?}", tokenizer.decode(&ids, true)?);

    Ok(())
}
