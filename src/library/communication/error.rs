use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::library::BoxedError;

/// Type erased, serializable error which retains the error chain information
///
/// This error is used to retain information about errors and their causes when
/// sending a failed reply over the wire. While a requesting client does not know about
/// the possible types of errors a request handler may raise, it can still use this error
/// type to embed in its own errors and display meaningful information to the caller.
///
/// When the Error from which this is created contains another BlackboxError in its
/// source chain, it will be consumed and integrated so that one nicely formatted
/// stacktrace can be provided at the top-most level.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlackboxError {
    causes: Vec<String>,
}

impl BlackboxError {
    /// Creates a new instance from any error type
    ///
    /// Due to std providing default implementations for the `From<T> where T: T` trait,
    /// we can't both implement `Error` and `From<Error>` and have to decide on one.
    pub fn new<E: Error + 'static>(e: E) -> Self {
        (&e as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance from a boxed error type
    pub fn from_boxed(e: BoxedError) -> Self {
        (e.as_ref() as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance with a single cause
    pub fn from_reason(reason: impl Into<String>) -> Self {
        Self {
            causes: vec![reason.into()],
        }
    }

    /// Causes from the top-most error down to the root cause
    pub fn causes(&self) -> &[String] {
        &self.causes
    }

    /// Top-most cause, if any
    pub fn reason(&self) -> Option<&str> {
        self.causes.first().map(String::as_str)
    }
}

#[cfg(test)]
impl BlackboxError {
    fn new_with_causes(causes: Vec<String>) -> Self {
        Self { causes }
    }
}

impl Error for BlackboxError {}

impl Display for BlackboxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(first) = self.causes.first() {
            writeln!(f, "Error: {}", first)?;
        } else {
            writeln!(f, "Unknown error")?;
            return Ok(());
        }

        writeln!(f, "\nCaused by:")?;
        for (index, cause) in self.causes.iter().skip(1).enumerate() {
            writeln!(f, "    {}: {}", index, cause)?;
        }

        Ok(())
    }
}

impl From<&(dyn Error + 'static)> for BlackboxError {
    fn from(e: &(dyn Error + 'static)) -> Self {
        let mut source: Option<&(dyn Error + 'static)> = Some(e);
        let mut causes: Vec<String> = Vec::new();

        while let Some(error) = source {
            // Integrate any child BlackboxErrors and use ToString for anything else
            if let Some(blackbox_error) = error.downcast_ref::<BlackboxError>() {
                let mut child_causes = blackbox_error.causes.clone();
                causes.append(&mut child_causes);
            } else {
                causes.push(error.to_string());
            }

            source = error.source();
        }

        Self { causes }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use thiserror::Error;

    #[derive(Error, Debug)]
    enum TestError {
        #[error("Internal error")]
        Internal(#[from] BlackboxError),
        #[error("invalid digit in request")]
        Parse(#[source] std::num::ParseIntError),
    }

    #[test]
    fn capture_source_chain() {
        let source = "five".parse::<u32>().unwrap_err();
        let error = BlackboxError::new(TestError::Parse(source));

        assert_eq!(error.reason(), Some("invalid digit in request"));
        assert_eq!(error.causes().len(), 2);
    }

    #[test]
    fn survive_the_wire() {
        let error = BlackboxError::from_reason("handler exploded");
        let encoded = serde_json::to_vec(&error).unwrap();
        let decoded: BlackboxError = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(decoded, error);
    }

    #[test]
    fn handle_no_cause() {
        let error = BlackboxError::new_with_causes(Vec::new());
        assert_eq!(error.to_string(), "Unknown error\n");
    }

    #[test]
    fn consume_nested() {
        let lower_error =
            BlackboxError::new_with_causes(vec![String::from("cause1"), String::from("cause2")]);
        let middle_error = TestError::from(lower_error);
        let high_error = BlackboxError::from(&middle_error as &(dyn Error + 'static));

        assert_eq!(
            high_error.causes,
            vec!["Internal error", "cause1", "cause2"]
        )
    }

    #[test]
    fn format_correctly() {
        let formatted = BlackboxError::new_with_causes(vec![
            String::from("cause1"),
            String::from("cause2"),
            String::from("cause3"),
        ])
        .to_string();

        assert_eq!(
            formatted,
            r#"Error: cause1

Caused by:
    0: cause2
    1: cause3
"#
        )
    }
}
