//! Rendering of panic payloads caught from processors, filters and client
//! factories.

use std::{any::Any, fmt};

/// A caught panic payload that renders as its message.
///
/// String payloads render verbatim; anything else falls back to `Debug`.
///
/// ```
/// use brokerframe::panic::format_panic;
///
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(format_panic(Box::new(String::from("boom"))).as_str(), Some("boom"));
/// assert!(format_panic(Box::new(5_u32)).as_str().is_none());
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl PanicMessage {
    /// The panic message, if the payload was a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| self.0.downcast_ref::<&'static str>().copied())
    }

    /// Recover the raw payload, e.g. to resume unwinding.
    #[must_use]
    pub fn into_payload(self) -> Box<dyn Any + Send> { self.0 }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(message) => f.write_str(message),
            None => write!(f, "{:?}", self.0),
        }
    }
}

/// Wrap a payload returned by `catch_unwind`.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

#[cfg(test)]
mod tests {
    use std::panic;

    use super::*;

    #[test]
    fn formatted_panic_from_catch_unwind() {
        let payload = panic::catch_unwind(|| panic!("processor failed: {}", 7))
            .expect_err("closure panics");
        assert_eq!(format_panic(payload).to_string(), "processor failed: 7");
    }

    #[test]
    fn non_string_payload_uses_debug() {
        let message = format_panic(Box::new(42_i32));
        assert!(message.to_string().contains("Any"));
        assert!(message.into_payload().downcast_ref::<i32>().is_some());
    }
}
