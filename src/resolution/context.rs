use crate::detection::token_spans;

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Text window used to disambiguate one abbreviation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionContext<'a> {
    /// First sentence containing the abbreviation, newlines flattened.
    Sentence(String),
    /// No sentence matched; the whole input.
    FullText(&'a str),
}

impl<'a> ResolutionContext<'a> {
    /// Select the first sentence whose tokens include `abbr`, or the full text.
    pub fn for_abbreviation(text: &'a str, abbr: &str) -> Self {
        text.split(SENTENCE_TERMINATORS)
            .find(|sentence| token_spans(sentence).any(|t| t.as_str() == abbr))
            .map(|sentence| Self::Sentence(sentence.replace(['\n', '\r'], " ").trim().to_string()))
            .unwrap_or(Self::FullText(text))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Sentence(sentence) => sentence,
            Self::FullText(text) => text,
        }
    }

    pub fn is_sentence(&self) -> bool {
        matches!(self, Self::Sentence(_))
    }
}
