use std::cell::RefCell;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use relic_contracts::events::{EventPayload, EventWriter};
use serde_json::{json, Value};

use crate::error::{error_chain_message, is_transient};
use crate::transport::ContentGenerator;

pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Wait before retry number `retry` (1-based): `initial_delay * 2^(retry-1)`.
    pub fn delay_for(&self, retry: usize) -> Duration {
        let exponent = u32::try_from(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }
}

/// Runs `op`, retrying transient failures within the policy. `on_retry`
/// sees each scheduled retry (1-based number, delay) before `sleep` waits
/// it out; the last error is returned unchanged.
pub fn call_with_retry_using<T, F, S, H>(
    policy: &RetryPolicy,
    mut sleep: S,
    mut on_retry: H,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
    S: FnMut(Duration),
    H: FnMut(usize, Duration),
{
    let mut retry = 0usize;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if retry >= policy.max_retries || !is_transient(&err) {
                    return Err(err);
                }
                retry += 1;
                let delay = policy.delay_for(retry);
                on_retry(retry, delay);
                sleep(delay);
            }
        }
    }
}

/// A [`ContentGenerator`] call wrapped in the retry policy.
///
/// Each scheduled retry is logged as a `retry_scheduled` event when an
/// event writer is attached.
#[derive(Clone)]
pub struct RetryingGenerator<'a> {
    inner: &'a dyn ContentGenerator,
    policy: RetryPolicy,
    events: Option<EventWriter>,
}

impl<'a> RetryingGenerator<'a> {
    pub fn new(inner: &'a dyn ContentGenerator, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn generate(&self, model: &str, payload: &Value) -> Result<Value> {
        let last_error: RefCell<Option<String>> = RefCell::new(None);
        let mut log_failure: Option<anyhow::Error> = None;
        let result = call_with_retry_using(
            &self.policy,
            thread::sleep,
            |retry, delay| {
                let Some(events) = self.events.as_ref() else {
                    return;
                };
                let mut event = EventPayload::new();
                event.insert("model".to_string(), json!(model));
                event.insert("retry".to_string(), json!(retry));
                event.insert("max_retries".to_string(), json!(self.policy.max_retries));
                event.insert(
                    "delay_ms".to_string(),
                    json!(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
                );
                event.insert("error".to_string(), json!(last_error.borrow_mut().take()));
                if let Err(err) = events.emit("retry_scheduled", event) {
                    log_failure.get_or_insert(err);
                }
            },
            || {
                self.inner
                    .generate_content(model, payload)
                    .inspect_err(|err| *last_error.borrow_mut() = Some(error_chain_message(err)))
            },
        );
        let value = result?;
        if let Some(err) = log_failure {
            return Err(err.context("failed to record retry event"));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    use anyhow::anyhow;

    use super::{call_with_retry_using, RetryPolicy};
    use crate::error::{classify_failure, FailureKind, ServiceError};

    fn flaky(failures: usize, calls: &Cell<usize>) -> anyhow::Result<&'static str> {
        calls.set(calls.get() + 1);
        if calls.get() <= failures {
            return Err(ServiceError::from_status(503, "overloaded").into());
        }
        Ok("restored")
    }

    #[test]
    fn succeeds_after_transient_failures_with_doubling_delays() -> anyhow::Result<()> {
        let policy = RetryPolicy::default();
        for failures in 0..=policy.max_retries {
            let calls = Cell::new(0);
            let sleeps = RefCell::new(Vec::new());
            let value = call_with_retry_using(
                &policy,
                |delay| sleeps.borrow_mut().push(delay),
                |_, _| {},
                || flaky(failures, &calls),
            )?;
            assert_eq!(value, "restored");
            assert_eq!(calls.get(), failures + 1);
            let expected = (1..=failures)
                .map(|retry| Duration::from_millis(1000 * (1 << (retry - 1))))
                .collect::<Vec<Duration>>();
            assert_eq!(*sleeps.borrow(), expected);
        }
        Ok(())
    }

    #[test]
    fn gives_up_after_max_retries_with_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let calls = Cell::new(0);
        let sleeps = RefCell::new(Vec::new());
        let err = call_with_retry_using(
            &policy,
            |delay| sleeps.borrow_mut().push(delay),
            |_, _| {},
            || flaky(10, &calls),
        )
        .err();
        assert_eq!(calls.get(), 3);
        assert_eq!(
            *sleeps.borrow(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
        assert_eq!(
            err.as_ref().map(classify_failure),
            Some(FailureKind::TransientServer)
        );
    }

    #[test]
    fn non_transient_failure_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0);
        let sleeps = RefCell::new(Vec::new());
        let result: anyhow::Result<()> = call_with_retry_using(
            &policy,
            |delay| sleeps.borrow_mut().push(delay),
            |_, _| {},
            || {
                calls.set(calls.get() + 1);
                Err(anyhow!(ServiceError::SynthesisFailure("no image".to_string())))
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
        assert!(sleeps.borrow().is_empty());
    }

    #[test]
    fn retry_hook_sees_each_scheduled_retry() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5));
        let calls = Cell::new(0);
        let seen = RefCell::new(Vec::new());
        let result = call_with_retry_using(
            &policy,
            |_| {},
            |retry, delay| seen.borrow_mut().push((retry, delay)),
            || flaky(2, &calls),
        );
        assert!(result.is_ok());
        assert_eq!(
            *seen.borrow(),
            vec![(1, Duration::from_millis(5)), (2, Duration::from_millis(10))]
        );
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert!(policy.delay_for(80) >= policy.delay_for(32));
    }

    #[test]
    fn retrying_generator_logs_each_retry() -> anyhow::Result<()> {
        use relic_contracts::events::EventWriter;
        use serde_json::{json, Value};

        use super::RetryingGenerator;
        use crate::transport::testing::ScriptedGenerator;

        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let generator = ScriptedGenerator::new()
            .fail("m", || ServiceError::from_status(502, "bad gateway").into())
            .reply("m", json!({"ok": true}));
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let retrying = RetryingGenerator::new(&generator, policy)
            .with_events(EventWriter::new(&events_path, "session-1"));

        let value = retrying.generate("m", &json!({}))?;
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(generator.calls_for("m"), 2);

        let content = std::fs::read_to_string(&events_path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let event: Value = serde_json::from_str(lines[0])?;
        assert_eq!(event["type"], json!("retry_scheduled"));
        assert_eq!(event["retry"], json!(1));
        assert_eq!(event["delay_ms"], json!(1));
        assert!(event["error"]
            .as_str()
            .map(|text| text.contains("bad gateway"))
            .unwrap_or(false));
        Ok(())
    }
}
