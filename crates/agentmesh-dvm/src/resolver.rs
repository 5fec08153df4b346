//! Dependency resolution over the event database
//!
//! A job request may chain on prior results. Resolution walks the chain,
//! enforcing:
//!
//! - results exist and have kinds in [6000, 6999]
//! - every dependency is strictly older than the job that uses it
//! - no cycles
//! - chains no deeper than [`MAX_RESOLVE_DEPTH`]
//!
//! The resolver is pure over the database snapshot.

use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

use agentmesh_eventdb::EventStore;
use agentmesh_types::kinds;

use crate::error::DvmError;
use crate::parser::{parse_dvm_job_request, DvmJobRequest};

/// Maximum dependency-chain depth
pub const MAX_RESOLVE_DEPTH: u32 = 10;

/// A resolved dependency record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDependency {
    pub kind: u32,
    pub content: String,
    pub status: String,
    pub created_at: i64,
}

const KNOWN_STATUSES: [&str; 3] = ["success", "error", "partial"];

/// Resolve every dependency of `request`, recursively.
///
/// Returns a mapping of dependency event id to resolved record.
pub async fn resolve_dependencies(
    request: &DvmJobRequest,
    db: &EventStore,
) -> Result<HashMap<String, ResolvedDependency>, DvmError> {
    let mut visited = HashSet::new();
    resolve_inner(request, db, 0, &mut visited).await
}

fn resolve_inner<'a>(
    request: &'a DvmJobRequest,
    db: &'a EventStore,
    depth: u32,
    visited: &'a mut HashSet<String>,
) -> BoxFuture<'a, Result<HashMap<String, ResolvedDependency>, DvmError>> {
    Box::pin(async move {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(DvmError::MaxDepthExceeded { depth });
        }
        if request.dependencies.is_empty() {
            return Ok(HashMap::new());
        }
        if visited.contains(&request.event.id) {
            return Err(DvmError::CircularDependency {
                event_id: request.event.id.clone(),
            });
        }
        visited.insert(request.event.id.clone());

        let mut resolved = HashMap::new();
        for dependency_id in &request.dependencies {
            let dependency =
                db.get(dependency_id)
                    .await?
                    .ok_or_else(|| DvmError::MissingDependency {
                        event_id: dependency_id.clone(),
                    })?;
            if !(kinds::DVM_RESULT_MIN..=kinds::DVM_RESULT_MAX).contains(&dependency.kind) {
                return Err(DvmError::MissingDependency {
                    event_id: dependency_id.clone(),
                });
            }
            if dependency.created_at >= request.event.created_at {
                return Err(DvmError::InvalidDependencyTimestamp {
                    event_id: dependency_id.clone(),
                });
            }
            let status = dependency
                .first_tag_value("status")
                .filter(|s| KNOWN_STATUSES.contains(s))
                .unwrap_or("success")
                .to_string();
            resolved.insert(
                dependency_id.clone(),
                ResolvedDependency {
                    kind: dependency.kind,
                    content: dependency.content.clone(),
                    status,
                    created_at: dependency.created_at,
                },
            );

            // walk through the result to its originating request and pick
            // up that request's own chain
            if let Some(origin_id) = dependency.first_tag_value("e") {
                if let Some(origin) = db.get(origin_id).await? {
                    if let Ok(origin_request) = parse_dvm_job_request(&origin) {
                        if !origin_request.dependencies.is_empty() {
                            debug!(
                                depth,
                                origin = %origin.id,
                                "recursing into originating request"
                            );
                            let nested =
                                resolve_inner(&origin_request, db, depth + 1, visited).await?;
                            resolved.extend(nested);
                        }
                    }
                }
            }
        }
        Ok(resolved)
    })
}
