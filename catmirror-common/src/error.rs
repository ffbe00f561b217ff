// Copyright 2026 catmirror Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    backtrace::Backtrace,
    fmt::{Debug, Display},
    sync::Arc,
};

/// ErrorKind is all kinds of Error of catmirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Use of a natively-owned resource whose dual-state guard is already released.
    ///
    /// Continuing would read freed native memory, so this is always reported loudly.
    Released,
    /// Registration against a lifespan that has already been torn down.
    LifespanEnded,
    /// A computation needs to re-enter the backend but the caller is not on the mutator.
    WrongContext,
    /// The external entity behind an identity key does not exist (anymore).
    NotFound,
    /// A constructor looked up the very key it is constructing.
    Reentrant,
    /// Native window access failure.
    Native,
    /// Error raised by a collaborator.
    External,
    /// Config error.
    Config,
    /// The owning catalog has been dropped.
    Closed,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::Released => "Released resource used",
            ErrorKind::LifespanEnded => "Lifespan ended",
            ErrorKind::WrongContext => "Wrong execution context",
            ErrorKind::NotFound => "Not found",
            ErrorKind::Reentrant => "Reentrant construction",
            ErrorKind::Native => "Native access error",
            ErrorKind::External => "External error",
            ErrorKind::Config => "Config error",
            ErrorKind::Closed => "Closed",
        }
    }
}

/// Error is the error struct returned by all catmirror functions.
///
/// `Display` prints a single line:
///
/// ```shell
/// Not found, context: { key: (1259,16384,0) } => catalog row not found
/// ```
///
/// `Debug` prints multiple lines with the context, the source and the backtrace (if captured).
/// `{:#?}` falls back to the conventional struct-style representation.
///
/// Errors are cheap to clone: the source and the backtrace are shared.
pub struct Error {
    kind: ErrorKind,
    message: String,

    context: Vec<(&'static str, String)>,

    source: Option<Arc<anyhow::Error>>,
    backtrace: Option<Arc<Backtrace>>,
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("source", &self.source);
            de.field("backtrace", &self.backtrace);
            return de.finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "  {}: {}", k, v)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source:")?;
            writeln!(f, "  {source:#}")?;
        }

        if let Some(backtrace) = &self.backtrace {
            writeln!(f)?;
            writeln!(f, "Backtrace:")?;
            writeln!(f, "{backtrace}")?;
        }

        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            let mut iter = self.context.iter().peekable();
            while let Some((k, v)) = iter.next() {
                write!(f, "{}: {}", k, v)?;
                if iter.peek().is_some() {
                    write!(f, ", ")?;
                }
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref().as_ref())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            context: self.context.clone(),
            source: self.source.clone(),
            backtrace: self.backtrace.clone(),
        }
    }
}

impl Error {
    /// Create a new error.
    ///
    /// If the error needs to carry a source error, please use `with_source` method.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            source: None,
            backtrace: Some(Arc::new(Backtrace::capture())),
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Set source for error.
    ///
    /// # Notes
    ///
    /// If the source has been set, we will raise a panic here.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(Arc::new(source.into()));
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error context.
    pub fn context(&self) -> &Vec<(&'static str, String)> {
        &self.context
    }

    /// Get the error backtrace.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }

    /// Get the error source.
    pub fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }

    /// Downcast the reference of the source error to a specific error type reference.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }
}

/// Result type for catmirror.
pub type Result<T> = std::result::Result<T, Error>;

/// Helper methods for Error.
impl Error {
    /// Helper for creating an [`ErrorKind::Released`] error for the resource at `handle`.
    pub fn released(what: &'static str, handle: impl ToString) -> Self {
        Error::new(ErrorKind::Released, format!("{what} used after release")).with_context("handle", handle)
    }

    /// Helper for creating an [`ErrorKind::WrongContext`] error for the named computation.
    pub fn wrong_context(what: &'static str) -> Self {
        Error::new(
            ErrorKind::WrongContext,
            "computation requires the mutator context but was attempted from a reader",
        )
        .with_context("computation", what)
    }

    /// Helper for creating an [`ErrorKind::NotFound`] error for the given key.
    pub fn not_found(key: impl Debug) -> Self {
        Error::new(ErrorKind::NotFound, "no such entity in the backend").with_context("key", format!("{key:?}"))
    }

    /// Helper for creating an [`ErrorKind::Native`] out of range error.
    pub fn out_of_range(address: usize, offset: usize, len: usize) -> Self {
        Error::new(ErrorKind::Native, "native window access out of range")
            .with_context("address", format!("{address:#x}"))
            .with_context("offset", offset)
            .with_context("len", len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Error>();
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct BackendError(String);

    impl std::fmt::Display for BackendError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "BackendError: {}", self.0)
        }
    }

    impl std::error::Error for BackendError {}

    #[test]
    fn test_error_display() {
        let err = Error::new(ErrorKind::External, "syscache search failed")
            .with_source(BackendError("cache lookup failed".to_string()))
            .with_context("class", 1259)
            .with_context("oid", 16384);

        assert_eq!(
            "External error, context: { class: 1259, oid: 16384 } => syscache search failed, source: BackendError: cache lookup failed",
            err.to_string()
        );
    }

    #[test]
    fn test_error_clone_shares_source() {
        let inner = BackendError("relation vanished".to_string());
        let err = Error::new(ErrorKind::External, "").with_source(inner.clone());
        let cloned = err.clone();

        assert_eq!(cloned.kind(), ErrorKind::External);
        assert_eq!(cloned.downcast_ref::<BackendError>().unwrap(), &inner);
    }

    #[test]
    fn test_error_helpers() {
        let e = Error::released("tuple descriptor", "0x1000");
        assert_eq!(e.kind(), ErrorKind::Released);
        assert_eq!(e.context(), &vec![("handle", "0x1000".to_string())]);

        let e = Error::out_of_range(0x20, 8, 4);
        assert_eq!(e.kind(), ErrorKind::Native);
        assert_eq!(e.context()[0], ("address", "0x20".to_string()));
    }
}
