use thiserror::Error;

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StateError {
    /// The storage driver failed to read, write or create a directory.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// State could not be turned into a JSON document.
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// A stored document was not valid JSON for the module's schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// A batch signal other than `W` or `C`.
    #[error("unknown batch opcode: '{0}'")]
    UnknownOpcode(char),
    /// Engine configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl StateError {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
