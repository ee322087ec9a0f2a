pub type DocumentResult<T> = Result<T, DocumentError>;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error(transparent)]
    Piece(#[from] editor_core::errors::PieceError),

    /// The file is on the save worker; edits and reads must wait.
    #[error("a save is in progress")]
    SaveInProgress,

    #[error("no save is in progress")]
    NoSaveInProgress,

    /// The save worker is gone, and with it the file it was writing.
    #[error(transparent)]
    QueueClosed(#[from] util::QueueClosed),
}

impl From<std::io::Error> for DocumentError {
    fn from(err: std::io::Error) -> Self {
        DocumentError::Piece(editor_core::errors::PieceError::Io(err))
    }
}
