// ── Bounded command completion ──
//
// Converts a transport's asynchronous completion flag into a synchronous
// result: poll the flag at a fixed interval up to a fixed number of
// attempts, then compare the completion text to the success text.

use tracing::debug;

use doorlink_api::{COMMAND_SUCCESS_TEXT, PendingCommand};

use crate::config::CommandPollConfig;
use crate::error::CoreError;

/// Wait for `pending` to complete.
///
/// Succeeds only if the transport reported success *and* the completion
/// text is the success text. Any other text is a `CommandFailed`; no
/// completion within the poll budget is a `CommandTimeout`.
pub(crate) async fn await_completion(
    operation: &'static str,
    pending: &PendingCommand,
    poll: &CommandPollConfig,
) -> Result<(), CoreError> {
    for attempt in 0..=poll.max_attempts {
        if let Some(completion) = pending.completion() {
            debug!(operation, attempt, text = %completion.text, "command completed");
            return if completion.success && completion.text == COMMAND_SUCCESS_TEXT {
                Ok(())
            } else {
                Err(CoreError::CommandFailed {
                    operation,
                    message: completion.text.clone(),
                })
            };
        }
        if attempt < poll.max_attempts {
            tokio::time::sleep(poll.interval).await;
        }
    }

    Err(CoreError::CommandTimeout {
        operation,
        attempts: poll.max_attempts,
    })
}
