use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

/// Polls `future` to completion, turning a panic into `Err` with the panic message.
///
/// # Errors
///
/// Returns the panic message if `future` panicked.
pub async fn catch_panic<F>(future: F) -> Result<F::Output, String>
where
    F: Future,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "task panicked");
            Err(message)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_output_through() {
        assert_eq!(catch_panic(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_formatted_panic_message() {
        let code = 3;
        let result = catch_panic(async move {
            if code > 0 {
                panic!("failed with {code}");
            }
        })
        .await;

        assert_eq!(result, Err("failed with 3".to_string()));
    }
}
