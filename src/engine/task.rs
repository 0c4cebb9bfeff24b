use std::sync::Arc;
use std::time::Instant;

use tokio::task;
use tracing::{debug, warn};

use super::{Engine, ExecutionResult, Privilege, RequestContext};
use crate::error::{RequestError, Result};
use crate::query::{Latency, ParsedRequest, Request};
use crate::server::AdmissionPermit;

impl Engine {
    /// Parses `request` on the blocking pool, giving up after the parse
    /// timeout.
    ///
    /// Giving up only stops the wait: the parser keeps running to
    /// completion and its result is dropped.
    pub async fn parse_with_timeout(&self, request: Request) -> Result<ParsedRequest> {
        let parser = Arc::clone(&self.parser);
        let limit = self.options.parse_timeout;
        let handle = task::spawn_blocking(move || parser.parse(&request));
        match tokio::time::timeout(limit, handle).await {
            Err(_) => {
                warn!(timeout = ?limit, "abandoned slow parse");
                Err(RequestError::invalid(format!(
                    "parsing did not finish within {limit:?}"
                )))
            }
            Ok(Err(join)) => Err(RequestError::internal_with("parser task failed", join)),
            Ok(Ok(parsed)) => {
                parsed.map_err(|e| RequestError::invalid_with("failed to parse request", e))
            }
        }
    }

    /// Parses and executes `request` while holding `permit`.
    ///
    /// Execution runs on the blocking pool and keeps the permit until it
    /// finishes, even when the caller stops waiting at the request timeout.
    /// Requests declaring schema get no timeout.
    pub async fn run(
        self: &Arc<Self>,
        request: Request,
        privilege: Privilege,
        permit: AdmissionPermit,
    ) -> Result<(ExecutionResult, Latency)> {
        let mut latency = Latency::new();
        debug!(http = request.http, "request received");
        if !self.storage.is_ready() {
            return Err(RequestError::internal("server is not ready"));
        }
        let parsed = self.parse_with_timeout(request).await?;
        latency.parsing = latency.start.elapsed();

        let limit = (!parsed.has_schema_mutation()).then_some(self.options.request_timeout);
        let mut ctx = RequestContext::new(privilege);
        ctx.sampled = rand::random::<f64>() < self.options.trace_ratio;
        if let Some(limit) = limit {
            ctx = ctx.with_deadline(Instant::now() + limit);
        }
        debug!(?privilege, sampled = ctx.sampled, timeout = ?limit, "executing request");

        let engine = Arc::clone(self);
        let handle = task::spawn_blocking(move || {
            let _permit = permit;
            engine
                .execute(&ctx, parsed, &mut latency)
                .map(|result| (result, latency))
        });
        let joined = match limit {
            Some(limit) => tokio::time::timeout(limit, handle)
                .await
                .map_err(|_| RequestError::internal(format!("request timed out after {limit:?}")))?,
            None => handle.await,
        };
        joined.map_err(|e| RequestError::internal_with("request task failed", e))?
    }
}
