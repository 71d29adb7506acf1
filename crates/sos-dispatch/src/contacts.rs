//! Caller-owned contact list and emergency message template

use sos_common::{DispatchRequest, LocationFix, Recipient};
use tracing::info;

use crate::error::ContactError;

#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    contacts: Vec<Recipient>,
    emergency_message: String,
}

impl ContactBook {
    pub fn new(
        contacts: Vec<Recipient>,
        emergency_message: impl Into<String>,
    ) -> Result<Self, ContactError> {
        let mut book = Self {
            contacts: Vec::with_capacity(contacts.len()),
            emergency_message: emergency_message.into(),
        };
        for contact in contacts {
            book.add_contact(contact)?;
        }
        Ok(book)
    }

    pub fn contacts(&self) -> &[Recipient] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn emergency_message(&self) -> &str {
        &self.emergency_message
    }

    /// Replace the message template. Blank text is rejected and the current
    /// template is kept.
    pub fn update_emergency_message(&mut self, message: impl Into<String>) -> Result<(), ContactError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(ContactError::MessageEmpty);
        }
        self.emergency_message = message;
        info!("Emergency message updated");
        Ok(())
    }

    /// Append a contact; ids must be unique.
    pub fn add_contact(&mut self, contact: Recipient) -> Result<(), ContactError> {
        if self.contacts.iter().any(|c| c.id == contact.id) {
            return Err(ContactError::DuplicateContact(contact.id));
        }
        self.contacts.push(contact);
        Ok(())
    }

    pub fn remove_contact(&mut self, id: &str) -> Result<Recipient, ContactError> {
        let index = self
            .contacts
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| ContactError::NotFound(id.to_string()))?;
        Ok(self.contacts.remove(index))
    }

    /// Snapshot the book into a request; later edits do not affect it.
    pub fn request(&self, location: Option<LocationFix>) -> DispatchRequest {
        DispatchRequest {
            message: self.emergency_message.clone(),
            recipients: self.contacts.clone(),
            location,
        }
    }
}
