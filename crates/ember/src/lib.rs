//! # Ember
//!
//! Client-side tokenization and autoregressive decoding sessions.
//!
//! Ember wraps [`ember_core`] with the pieces that touch the outside world:
//! - **Async loading**: tokenizers from a URL, parsed JSON, raw bytes or a file
//! - **Tokenizer handle**: fails loudly with `NotInitialized` until loaded
//! - **Generation sessions**: drive the KV cache protocol against any
//!   [`ExecutionBackend`](session::ExecutionBackend)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ember::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tokenizer = TokenizerHandle::new();
//!     tokenizer
//!         .load(TokenizerSource::Url("https://host/model/tokenizer.json".into()))
//!         .await?;
//!
//!     let model = load_model_config("https://host/model/config.json", &FetchConfig::default()).await?;
//!     let mut session = GenerationSession::for_model(backend, &model);
//!     println!("{}", session.generate_text(&tokenizer, "Hello").await?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use ember_core::*;

pub mod handle;
pub mod session;
pub mod source;

pub use handle::TokenizerHandle;
pub use session::{ExecutionBackend, GenerationConfig, GenerationSession};
pub use source::{fetch_json, load_model_config, FetchConfig, TokenizerSource};

/// Commonly used types.
pub mod prelude {
    pub use crate::handle::TokenizerHandle;
    pub use crate::session::{ExecutionBackend, GenerationConfig, GenerationSession};
    pub use crate::source::{load_model_config, FetchConfig, TokenizerSource};
    pub use ember_core::prelude::*;

    // Re-export useful external types
    pub use anyhow;
    pub use tokio;
    pub use tracing;
}
