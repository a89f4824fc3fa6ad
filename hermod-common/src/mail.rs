use mailparse::MailHeaderMap;

use crate::error::MailError;

/// An RFC 5322 message held as raw bytes.
///
/// The buffer is reused across [`retrieve`](Mail::retrieve)/[`clear`](Mail::clear)
/// cycles so per-thread contexts do not reallocate for every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mail {
    raw: Vec<u8>,
}

impl Mail {
    /// Parse-check `bytes` and load them into this handle.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Malformed`] if the header block cannot be parsed;
    /// the previous content is left untouched in that case.
    pub fn retrieve(&mut self, bytes: &[u8]) -> Result<(), MailError> {
        mailparse::parse_headers(bytes).map_err(|e| MailError::Malformed(e.to_string()))?;

        self.raw.clear();
        self.raw.extend_from_slice(bytes);
        Ok(())
    }

    /// # Errors
    ///
    /// See [`Mail::retrieve`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MailError> {
        let mut mail = Self::default();
        mail.retrieve(bytes)?;
        Ok(mail)
    }

    pub fn clear(&mut self) {
        self.raw.clear();
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// First value of the header `name`, if present.
    pub fn header(&self, name: &str) -> Option<String> {
        mailparse::parse_headers(&self.raw)
            .ok()
            .and_then(|(headers, _)| headers.get_first_value(name))
    }
}
