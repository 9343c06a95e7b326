//! Best-effort notification dispatch.

use bmcfan_traits::{Notifier, Priority};

use crate::hw_error::{Op, map_hw_error};

/// Send a notification; failures are logged and swallowed.
///
/// Returns whether the notifier accepted the message.
pub fn send_best_effort<N: Notifier + ?Sized>(
    notifier: &mut N,
    title: &str,
    body: &str,
    priority: Priority,
) -> bool {
    match notifier.send(title, body, priority) {
        Ok(()) => {
            tracing::debug!(title, priority = priority.level(), "notification sent");
            true
        }
        Err(e) => {
            let err = map_hw_error(&*e, Op::Notify);
            tracing::warn!(title, error = %err, "notification failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingNotifier;

    #[test]
    fn failure_is_reported_not_raised() {
        let mut n = RecordingNotifier::failing();
        assert!(!send_best_effort(&mut n, "t", "b", Priority::High));
        assert_eq!(n.sent().len(), 1);

        let mut ok = RecordingNotifier::default();
        assert!(send_best_effort(&mut ok, "t", "b", Priority::Low));
    }
}
