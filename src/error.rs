use thiserror::Error;

/// 入力GMLの字句・構文エラー
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected '<' at byte {offset}")]
    UnexpectedContent { offset: usize },

    #[error("mismatched closing tag at byte {offset}: expected </{expected}>, found </{found}>")]
    MismatchedTag {
        offset: usize,
        expected: String,
        found: String,
    },

    #[error("unexpected end of input at byte {offset} while inside {open}")]
    UnexpectedEof { offset: usize, open: String },
}

/// フィルタリング全体のエラー。どれも致命的で、部分的な出力は返さない。
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("input is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("unexpected CityGML structure: {0}")]
    Structure(String),

    #[error("serialized output is not well-formed: {0}")]
    MalformedOutput(String),
}

impl FilterError {
    pub(crate) fn structure(msg: impl Into<String>) -> Self {
        Self::Structure(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
