//! Typed results and the handler that produces them.

use super::Document;

/// Outcome of handling one normalized message.
///
/// Either part may be absent: a malformed or unrecognized message yields a
/// result without a document.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageResult<T> {
    document: Option<Document>,
    value: Option<T>,
}

impl<T> MessageResult<T> {
    pub fn new(document: Option<Document>, value: Option<T>) -> Self {
        Self { document, value }
    }

    /// A result carrying both the document and a domain value.
    pub fn with_value(document: Document, value: T) -> Self {
        Self::new(Some(document), Some(value))
    }

    /// A result with neither document nor value.
    pub fn empty() -> Self {
        Self::new(None, None)
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_parts(self) -> (Option<Document>, Option<T>) {
        (self.document, self.value)
    }
}

/// Turns a normalized document into a typed result.
///
/// Handlers must be total: report failure by returning a result without a
/// document instead of panicking.
pub trait ResultHandler<T>: Send + Sync {
    fn handle(&self, document: Document) -> MessageResult<T>;
}

impl<T, F> ResultHandler<T> for F
where
    F: Fn(Document) -> MessageResult<T> + Send + Sync,
{
    fn handle(&self, document: Document) -> MessageResult<T> {
        self(document)
    }
}

/// Keeps non-empty documents and produces no domain value.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHandler;

impl<T> ResultHandler<T> for DefaultHandler {
    fn handle(&self, document: Document) -> MessageResult<T> {
        if document.is_empty() {
            MessageResult::empty()
        } else {
            MessageResult::new(Some(document), None)
        }
    }
}
