/// Failure classes that map onto distinct process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required external resource reference is missing or unusable.
    Configuration,
    /// A date token failed the strict `D-M-YYYY` shape check.
    FilenameIntegrity,
    /// The record source could not be fetched for this cycle.
    SourceFetch,
    /// Another runner holds the generation lock.
    LockContention,
    /// Filesystem failure outside a single record's scope.
    Io,
    /// Template rendering failed for one record.
    Render,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Configuration => 2,
            ErrorKind::FilenameIntegrity => 3,
            ErrorKind::SourceFetch => 4,
            ErrorKind::LockContention => 5,
            ErrorKind::Io => 6,
            ErrorKind::Render => 7,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceFetch, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("exit_code", &self.exit_code())
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_have_distinct_exit_codes() {
        let kinds = [
            ErrorKind::Configuration,
            ErrorKind::FilenameIntegrity,
            ErrorKind::SourceFetch,
            ErrorKind::LockContention,
            ErrorKind::Io,
            ErrorKind::Render,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(codes.iter().all(|c| *c != 0));
    }
}
