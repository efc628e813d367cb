//! Assertion macros shared by integration tests.

/// Await a receive with a timeout and panic with the call site on failure.
///
/// The expression must yield `Option<T>`, as `mpsc::Receiver::recv` does.
#[macro_export]
macro_rules! recv_expect {
    ($fut:expr) => {{
        ::tokio::time::timeout(::std::time::Duration::from_secs(5), $fut)
            .await
            .expect(concat!("recv timed out at ", file!(), ":", line!()))
            .expect(concat!("channel closed at ", file!(), ":", line!()))
    }};
}

pub use crate::recv_expect;
