// Location: src/model/tokenizer.rs

use std::path::Path;
use std::sync::Arc;

use tokenizers::Tokenizer as HfTokenizer;

use super::ModelFamily;
use crate::error::ClassifierError;

/// Error type for tokenizer operations
#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("Failed to load tokenizer: {0}")]
    LoadError(String),

    #[error("Vocabulary has no '{0}' token")]
    MissingSpecialToken(String),

    #[error("Tokenization failed: {0}")]
    EncodeError(String),

    #[error("Decoding failed: {0}")]
    DecodeError(String),
}

impl From<TokenizerError> for ClassifierError {
    fn from(e: TokenizerError) -> Self {
        ClassifierError::TokenizerError {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

/// Start/end markers the classifier wraps every sequence in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpecialTokens {
    cls_token_id: u32,
    sep_token_id: u32,
}

/// WordPiece tokenizer with the `[CLS]`/`[SEP]` markers resolved
#[derive(Clone)]
pub struct ClassifierTokenizer {
    tokenizer: Arc<HfTokenizer>,
    family: ModelFamily,
    special_tokens: SpecialTokens,
}

impl ClassifierTokenizer {
    pub const CLS_TOKEN: &'static str = "[CLS]";
    pub const SEP_TOKEN: &'static str = "[SEP]";

    /// Wrap an already constructed HuggingFace tokenizer
    pub fn new(tokenizer: HfTokenizer, family: ModelFamily) -> Result<Self, TokenizerError> {
        let lookup = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| TokenizerError::MissingSpecialToken(token.to_string()))
        };
        let special_tokens = SpecialTokens {
            cls_token_id: lookup(Self::CLS_TOKEN)?,
            sep_token_id: lookup(Self::SEP_TOKEN)?,
        };

        Ok(Self {
            tokenizer: Arc::new(tokenizer),
            family,
            special_tokens,
        })
    }

    pub fn from_file(path: impl AsRef<Path>, family: ModelFamily) -> Result<Self, TokenizerError> {
        let path = path.as_ref();
        let tokenizer = HfTokenizer::from_file(path)
            .map_err(|e| TokenizerError::LoadError(format!("{}: {}", path.display(), e)))?;
        Self::new(tokenizer, family)
    }

    /// Parse a serialized `tokenizer.json`
    pub fn from_bytes(bytes: impl AsRef<[u8]>, family: ModelFamily) -> Result<Self, TokenizerError> {
        let tokenizer = HfTokenizer::from_bytes(bytes)
            .map_err(|e| TokenizerError::LoadError(e.to_string()))?;
        Self::new(tokenizer, family)
    }

    pub(crate) fn bert_from_file(path: &Path) -> crate::Result<Self> {
        Ok(Self::from_file(path, ModelFamily::Bert)?)
    }

    pub(crate) fn distilbert_from_file(path: &Path) -> crate::Result<Self> {
        Ok(Self::from_file(path, ModelFamily::DistilBert)?)
    }

    /// Map text to word-piece ids without adding any special tokens
    pub fn tokenize(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| TokenizerError::EncodeError(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, TokenizerError> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| TokenizerError::DecodeError(e.to_string()))
    }

    pub fn cls_token_id(&self) -> u32 {
        self.special_tokens.cls_token_id
    }

    pub fn sep_token_id(&self) -> u32 {
        self.special_tokens.sep_token_id
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }
}

impl std::fmt::Debug for ClassifierTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierTokenizer")
            .field("family", &self.family)
            .field("special_tokens", &self.special_tokens)
            .finish()
    }
}
