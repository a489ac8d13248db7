use std::future::Future;

use serde_json::Value;
use tokio::task::JoinSet;

use sieve_core::engine::{ChunkResult, EngineKind, FieldValues};
use sieve_core::error::{Result, SieveError};

/// Runs `call` for every input with at most `limit` calls in flight. Results come back in
/// input order regardless of completion order. The first error aborts the remaining calls.
pub(crate) async fn run_ordered<T, F, Fut>(
    inputs: Vec<T>,
    limit: usize,
    call: F,
) -> Result<Vec<ChunkResult>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<ChunkResult>> + Send + 'static,
{
    let total = inputs.len();
    let mut results: Vec<ChunkResult> = vec![None; total];
    let mut pending = inputs.into_iter().enumerate();
    let mut join_set = JoinSet::new();

    for (i, input) in pending.by_ref().take(limit.max(1)) {
        let fut = call(input);
        join_set.spawn(async move { (i, fut.await) });
    }

    while let Some(joined) = join_set.join_next().await {
        let (i, result) = joined.map_err(|e| {
            tracing::error!(error = %e, "Inference task panicked");
            SieveError::backend("executor", format!("task join error: {e}"))
        })?;
        results[i] = result?;

        if let Some((i, input)) = pending.next() {
            let fut = call(input);
            join_set.spawn(async move { (i, fut.await) });
        }
    }

    tracing::debug!(total, limit, "Completed ordered execution");
    Ok(results)
}

pub(crate) fn input_text(input: &FieldValues) -> Result<String> {
    input
        .get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SieveError::ContractViolation("chunk input has no 'text' field".into()))
}

/// Maps unparseable model output to an absent chunk result unless `strict` is set. Backend
/// failures always propagate.
pub(crate) fn lenient(result: Result<Value>, strict: bool, engine: EngineKind) -> Result<ChunkResult> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SieveError::ContractViolation(message)) if !strict => {
            tracing::warn!(engine = %engine, error = %message, "Discarding malformed chunk output");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Checks that a batch backend returned one entry per text.
pub(crate) fn ensure_len<T>(results: &[T], expected: usize, backend: &str) -> Result<()> {
    if results.len() != expected {
        return Err(SieveError::ContractViolation(format!(
            "backend {backend} returned {} results for {expected} inputs",
            results.len()
        )));
    }
    Ok(())
}
