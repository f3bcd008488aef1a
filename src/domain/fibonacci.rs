use crate::library::communication::request::RequestHandler;
use crate::library::BoxedError;
use async_trait::async_trait;
use std::num::ParseIntError;
use std::str::Utf8Error;
use thiserror::Error;
use tracing::info;

/// Errors raised while computing a Fibonacci number on behalf of a client
#[derive(Error, Debug)]
pub enum FibonacciError {
    /// Request body is not valid UTF-8
    #[error("request is not valid text")]
    NotText(#[source] Utf8Error),
    /// Request body is not a non-negative integer
    #[error("request {0:?} is not a non-negative integer")]
    NotANumber(String, #[source] ParseIntError),
    /// Result does not fit into 64 bits
    #[error("Fib({0}) exceeds the supported range")]
    Overflow(u64),
}

/// Largest Fibonacci number representable as `u64`, `fib(93)`
pub const FIBONACCI_MAX: u64 = 12_200_160_415_121_876_738;

/// Computes the `n`-th Fibonacci number with `fib(0) = 0` and `fib(1) = 1`
///
/// Returns `None` if the result does not fit into a `u64`, which is the case from `n = 94` on.
pub fn fibonacci(n: u64) -> Option<u64> {
    // Seeded with fib(-1) so that every iteration produces a number that is actually returned
    let (mut previous, mut current) = (1u64, 0u64);

    for _ in 0..n {
        let next = previous.checked_add(current)?;
        previous = current;
        current = next;
    }

    Some(current)
}

/// Parses a decimal request body and computes its Fibonacci number
pub fn fibonacci_request(payload: &[u8]) -> Result<u64, FibonacciError> {
    let text = std::str::from_utf8(payload).map_err(FibonacciError::NotText)?;
    let n = text
        .trim()
        .parse::<u64>()
        .map_err(|e| FibonacciError::NotANumber(text.to_owned(), e))?;

    fibonacci(n).ok_or(FibonacciError::Overflow(n))
}

/// [`RequestHandler`] answering decimal numbers with their Fibonacci number
#[derive(Debug, Default, Clone, Copy)]
pub struct FibonacciHandler;

#[async_trait]
impl RequestHandler for FibonacciHandler {
    async fn handle(&self, payload: Vec<u8>) -> Result<Vec<u8>, BoxedError> {
        info!(request = %String::from_utf8_lossy(&payload), "Fib");
        let result = fibonacci_request(&payload)?;
        Ok(result.to_string().into_bytes())
    }
}
