use crate::errors::{DocumentError, DocumentResult};
use editor_core::piece_table::file::PieceFile;

/// What the save worker hands back: the file and the outcome of its write.
type SaveOutcome<B> = (PieceFile<B>, editor_core::errors::PieceResult<()>);

/// One open file plus the worker that saves it.
///
/// Saving moves the [`PieceFile`] onto the worker, so while a save is in
/// flight the document has no file: every read and edit fails with
/// [`DocumentError::SaveInProgress`] until [`Document::finish_save`] (or a
/// successful [`Document::try_finish_save`]) returns it.
#[derive(Debug)]
pub struct Document<B: io::backing::Backing = std::fs::File> {
    file: Option<PieceFile<B>>,
    pending: Option<util::Ticket<SaveOutcome<B>>>,
    queue: util::SerialQueue,
}

impl Document<std::fs::File> {
    /// # Errors
    ///
    /// - `DocumentError::Piece` if the file cannot be opened.
    pub fn open(path: impl AsRef<std::path::Path>) -> DocumentResult<Self> {
        Self::new(PieceFile::open(path)?)
    }

    /// # Errors
    ///
    /// - `DocumentError::Piece` if the file cannot be opened or `config` is
    ///   invalid.
    pub fn open_with(
        path: impl AsRef<std::path::Path>,
        config: editor_core::config::PieceConfig,
    ) -> DocumentResult<Self> {
        Self::new(PieceFile::open_with(path, config)?)
    }
}

impl<B: io::backing::Backing + Send + 'static> Document<B> {
    /// # Errors
    ///
    /// - `DocumentError::Piece` if the save worker cannot be spawned.
    pub fn new(file: PieceFile<B>) -> DocumentResult<Self> {
        Ok(Self {
            file: Some(file),
            pending: None,
            queue: util::SerialQueue::new("document-save")?,
        })
    }

    #[inline]
    pub fn is_saving(&self) -> bool {
        self.pending.is_some()
    }

    /// The open file, unless it is being saved.
    ///
    /// # Errors
    ///
    /// - `DocumentError::SaveInProgress` while a save is in flight.
    pub fn file(&self) -> DocumentResult<&PieceFile<B>> {
        match self.file.as_ref() {
            Some(file) => Ok(file),
            None => Err(self.missing_file()),
        }
    }

    fn file_mut(&mut self) -> DocumentResult<&mut PieceFile<B>> {
        let missing = self.missing_file();

        self.file.as_mut().ok_or(missing)
    }

    /// Without a pending save, a missing file was lost with the worker.
    fn missing_file(&self) -> DocumentError {
        if self.pending.is_some() {
            DocumentError::SaveInProgress
        } else {
            DocumentError::QueueClosed(util::QueueClosed)
        }
    }

    /// # Errors
    ///
    /// - `DocumentError::SaveInProgress` while a save is in flight.
    /// - `DocumentError::Piece` if the edit is out of bounds.
    pub fn insert(&mut self, offset: u64, data: &[u8]) -> DocumentResult<()> {
        Ok(self.file_mut()?.insert(offset, data)?)
    }

    /// # Errors
    ///
    /// Same as [`Document::insert`].
    pub fn remove(&mut self, range: std::ops::Range<u64>) -> DocumentResult<()> {
        Ok(self.file_mut()?.remove(range)?)
    }

    /// # Errors
    ///
    /// Same as [`Document::insert`].
    pub fn replace(&mut self, range: std::ops::Range<u64>, data: &[u8]) -> DocumentResult<()> {
        Ok(self.file_mut()?.replace(range, data)?)
    }

    /// Hands the file to the save worker.
    ///
    /// # Errors
    ///
    /// - `DocumentError::SaveInProgress` if a save is already in flight.
    /// - `DocumentError::QueueClosed` if the worker is gone. The file goes
    ///   with it.
    pub fn begin_save(&mut self) -> DocumentResult<()> {
        if self.pending.is_some() {
            return Err(DocumentError::SaveInProgress);
        }

        let mut file = self.file.take().ok_or(util::QueueClosed)?;

        tracing::debug!(path = ?file.path(), "save queued");

        let ticket = self.queue.submit(move || {
            let result = file.write();

            (file, result)
        })?;

        self.pending = Some(ticket);

        Ok(())
    }

    /// Blocks until the pending save is done and takes the file back.
    ///
    /// # Errors
    ///
    /// - `DocumentError::NoSaveInProgress` without a prior
    ///   [`Document::begin_save`].
    /// - `DocumentError::Piece` if the write failed. The file is back with
    ///   its changes, ready for another save.
    /// - `DocumentError::QueueClosed` if the worker died with the file.
    pub fn finish_save(&mut self) -> DocumentResult<()> {
        let ticket = self
            .pending
            .take()
            .ok_or(DocumentError::NoSaveInProgress)?;
        let outcome = ticket.wait()?;

        self.complete(outcome)
    }

    /// Takes the file back if the pending save is done.
    /// Returns `false` if it is still running.
    ///
    /// # Errors
    ///
    /// Same as [`Document::finish_save`].
    pub fn try_finish_save(&mut self) -> DocumentResult<bool> {
        let ticket = self
            .pending
            .as_ref()
            .ok_or(DocumentError::NoSaveInProgress)?;

        match ticket.try_wait() {
            Ok(Some(outcome)) => {
                self.pending = None;
                self.complete(outcome)?;

                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(closed) => {
                self.pending = None;

                Err(closed.into())
            }
        }
    }

    /// Saves and waits for the result.
    ///
    /// # Errors
    ///
    /// Same as [`Document::begin_save`] and [`Document::finish_save`].
    pub fn save(&mut self) -> DocumentResult<()> {
        self.begin_save()?;
        self.finish_save()
    }

    fn complete(&mut self, (file, result): SaveOutcome<B>) -> DocumentResult<()> {
        let path = file.path().map(std::path::Path::to_path_buf);

        self.file = Some(file);

        match result {
            Ok(()) => {
                tracing::debug!(?path, "save finished");

                Ok(())
            }
            Err(err) => {
                tracing::warn!(?path, %err, "save failed");

                Err(err.into())
            }
        }
    }

    /// Waits for any pending save and returns the file.
    ///
    /// # Errors
    ///
    /// Same as [`Document::finish_save`].
    pub fn into_file(mut self) -> DocumentResult<PieceFile<B>> {
        if self.pending.is_some() {
            self.finish_save()?;
        }

        self.file.take().ok_or(DocumentError::QueueClosed(util::QueueClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_with(content: &[u8]) -> tempfile::NamedTempFile {
        let mut temp = tempfile::NamedTempFile::new().expect("could not create temp file");

        temp.write_all(content).expect("could not write temp file");
        temp.flush().unwrap();

        temp
    }

    /// In-memory backing whose writes always fail.
    #[derive(Debug)]
    struct ReadOnlyBacking(Vec<u8>);

    impl io::backing::Backing for ReadOnlyBacking {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
            let start = (offset as usize).min(self.0.len());
            let end = (start + buf.len()).min(self.0.len());

            buf[..end - start].copy_from_slice(&self.0[start..end]);

            Ok(end - start)
        }

        fn write_all_at(&mut self, _offset: u64, _bytes: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            ))
        }

        fn set_len(&mut self, _len: u64) -> std::io::Result<()> {
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            ))
        }

        fn sync(&mut self) -> std::io::Result<()> {
            Ok(())
        }

        fn len(&mut self) -> std::io::Result<u64> {
            Ok(self.0.len() as u64)
        }
    }

    #[test]
    fn save_writes_and_returns_the_file() {
        let temp = temp_with(b"0123456789");
        let mut document = Document::open(temp.path()).unwrap();

        document.insert(0, b"ab").unwrap();
        document.remove(5..7).unwrap();
        document.save().unwrap();

        assert_eq!(std::fs::read(temp.path()).unwrap(), b"ab01256789");

        let file = document.file().unwrap();

        assert!(!file.has_changes());
        assert_eq!(file.len(), 10);
    }

    #[test]
    fn edits_rejected_while_saving() {
        let temp = temp_with(b"abc");
        let mut document = Document::open(temp.path()).unwrap();

        document.replace(0..1, b"A").unwrap();
        document.begin_save().unwrap();

        assert!(document.is_saving());
        assert!(matches!(
            document.insert(0, b"x"),
            Err(DocumentError::SaveInProgress)
        ));
        assert!(matches!(document.file(), Err(DocumentError::SaveInProgress)));
        assert!(matches!(
            document.begin_save(),
            Err(DocumentError::SaveInProgress)
        ));

        document.finish_save().unwrap();

        assert!(!document.is_saving());
        document.insert(3, b"d").unwrap();
        assert_eq!(std::fs::read(temp.path()).unwrap(), b"Abc");
    }

    #[test]
    fn try_finish_save_eventually_returns_the_file() {
        let temp = temp_with(b"abc");
        let mut document = Document::open(temp.path()).unwrap();

        document.insert(1, b"-").unwrap();
        document.begin_save().unwrap();

        while !document.try_finish_save().unwrap() {
            std::thread::yield_now();
        }

        assert_eq!(std::fs::read(temp.path()).unwrap(), b"a-bc");
        assert!(document.file().is_ok());
    }

    #[test]
    fn finish_without_begin_fails() {
        let temp = temp_with(b"abc");
        let mut document = Document::open(temp.path()).unwrap();

        assert!(matches!(
            document.finish_save(),
            Err(DocumentError::NoSaveInProgress)
        ));
        assert!(matches!(
            document.try_finish_save(),
            Err(DocumentError::NoSaveInProgress)
        ));
    }

    #[test]
    fn failed_save_gives_the_file_back() {
        let file = PieceFile::from_backing(
            ReadOnlyBacking(b"abc".to_vec()),
            editor_core::config::PieceConfig::default(),
        )
        .unwrap();
        let mut document = Document::new(file).unwrap();

        document.insert(0, b"x").unwrap();

        assert!(matches!(
            document.save(),
            Err(DocumentError::Piece(editor_core::errors::PieceError::Io(_)))
        ));

        let file = document.into_file().unwrap();

        assert!(file.has_changes());
        assert_eq!(file.read(0..4).unwrap(), b"xabc");
    }
}
