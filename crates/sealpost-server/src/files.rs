//! Encrypted file relay.

use sealpost_core::Environment;
use sealpost_proto::{Event, FileId, FileNotice, FileUploadRequest, FileWire, UserId};

use crate::{
    driver::{Outcome, ServerDriver},
    error::ServerError,
    storage::{Sequence, Storage, StoredFile},
};

impl<E: Environment, S: Storage> ServerDriver<E, S> {
    /// Store an encrypted file and notify its recipient.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty filename or MIME type
    /// - `NotFound` if the recipient never registered
    /// - `Protocol` for malformed ciphertext fields
    pub fn upload_file(
        &mut self,
        caller: UserId,
        request: &FileUploadRequest,
    ) -> Result<Outcome<FileNotice>, ServerError> {
        if request.filename.trim().is_empty() || request.mime_type.trim().is_empty() {
            return Err(ServerError::invalid("filename and MIME type are required"));
        }
        self.require_identity(request.recipient_id)?;
        let bytes = request.decode()?;

        let notice = FileNotice {
            id: FileId(self.storage.next_id(Sequence::File)?),
            sender_id: caller,
            recipient_id: request.recipient_id,
            filename: request.filename.clone(),
            mime_type: request.mime_type.clone(),
            size: request.size,
            timestamp: self.env.now(),
        };
        self.storage.store_file(&StoredFile { notice: notice.clone(), bytes })?;

        tracing::debug!(file = %notice.id, size = notice.size, "stored file");
        Ok(Outcome::new(notice.clone()).push(notice.recipient_id, Event::NewFile(notice)))
    }

    /// Fetch a file. Only its sender and recipient may.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the file does not exist
    /// - `Forbidden` for anyone else
    pub fn fetch_file(&self, caller: UserId, id: FileId) -> Result<Outcome<FileWire>, ServerError> {
        let file = self.storage.load_file(id)?.ok_or(ServerError::NotFound { resource: "file" })?;
        if caller != file.notice.sender_id && caller != file.notice.recipient_id {
            return Err(ServerError::Forbidden { reason: "not a party to this file" });
        }
        Ok(Outcome::new(FileWire::new(file.notice, &file.bytes)))
    }
}
