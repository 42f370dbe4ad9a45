//! Record RPC Handlers
//!
//! HTTP endpoints exposing record operations to peer nodes. Each handler
//! translates a protocol DTO into a call on the autosharded storage; the
//! routing already performed by the sender resolves locally here, so the
//! operation lands in this node's wrapped storage (forwarded deletes
//! carry the marker and skip routing entirely).
//!
//! Typed storage errors leave as an [`ErrorResponse`] body whose `kind`
//! lets the sender rebuild the error; duplicate-key conflicts must
//! survive this mapping for the create retry loop to work.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use super::autosharded::AutoshardedStorage;
use super::error::StorageError;
use super::protocol::{
    CreateRecordRequest, CreateRecordResponse, DeleteRecordRequest, DeleteRecordResponse,
    ErrorResponse, ReadRecordResponse, UpdateRecordRequest, UpdateRecordResponse,
};
use super::types::{OperationMode, RecordId};

#[derive(Debug, Deserialize)]
pub struct ReadRecordParams {
    pub storage: Option<String>,
}

/// Stores a record whose position was chosen by the sending node.
pub async fn handle_create_record(
    Extension(storage): Extension<Arc<AutoshardedStorage>>,
    Json(req): Json<CreateRecordRequest>,
) -> Response {
    if let Err(response) = check_storage_name(&storage, Some(&req.storage)) {
        return response;
    }

    let mut rid = req.record_id;
    match storage
        .create_record(
            0,
            &mut rid,
            &req.content,
            req.version,
            req.record_type,
            OperationMode::Synchronous,
            None,
        )
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(CreateRecordResponse {
                cluster_position: rid.cluster_position,
                position: result.result,
            }),
        )
            .into_response(),
        Err(error) => {
            tracing::error!("Forwarded create of {} failed: {}", rid, error);
            error_response(&error)
        }
    }
}

pub async fn handle_read_record(
    Extension(storage): Extension<Arc<AutoshardedStorage>>,
    Path((cluster_id, cluster_position)): Path<(i16, i64)>,
    Query(params): Query<ReadRecordParams>,
) -> Response {
    if let Err(response) = check_storage_name(&storage, params.storage.as_deref()) {
        return response;
    }

    let rid = RecordId::with_position(cluster_id, cluster_position);
    match storage.read_record(&rid, None, false, None).await {
        Ok(result) => (
            StatusCode::OK,
            Json(ReadRecordResponse {
                content: result.result.content,
                record_type: result.result.record_type,
                version: result.result.version,
            }),
        )
            .into_response(),
        Err(error) => {
            tracing::debug!("Forwarded read of {} failed: {}", rid, error);
            error_response(&error)
        }
    }
}

pub async fn handle_update_record(
    Extension(storage): Extension<Arc<AutoshardedStorage>>,
    Json(req): Json<UpdateRecordRequest>,
) -> Response {
    if let Err(response) = check_storage_name(&storage, Some(&req.storage)) {
        return response;
    }

    match storage
        .update_record(
            &req.record_id,
            &req.content,
            req.version,
            req.record_type,
            OperationMode::Synchronous,
            None,
        )
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(UpdateRecordResponse {
                version: result.result,
            }),
        )
            .into_response(),
        Err(error) => {
            tracing::error!("Forwarded update of {} failed: {}", req.record_id, error);
            error_response(&error)
        }
    }
}

pub async fn handle_delete_record(
    Extension(storage): Extension<Arc<AutoshardedStorage>>,
    Json(req): Json<DeleteRecordRequest>,
) -> Response {
    if let Err(response) = check_storage_name(&storage, Some(&req.storage)) {
        return response;
    }

    match storage
        .delete_record(
            &req.record_id,
            req.version,
            OperationMode::Synchronous,
            req.forwarded,
            None,
        )
        .await
    {
        Ok(result) => (
            StatusCode::OK,
            Json(DeleteRecordResponse {
                deleted: result.result,
            }),
        )
            .into_response(),
        Err(error) => {
            tracing::error!("Forwarded delete of {} failed: {}", req.record_id, error);
            error_response(&error)
        }
    }
}

fn check_storage_name(
    storage: &AutoshardedStorage,
    requested: Option<&str>,
) -> Result<(), Response> {
    match requested {
        None => Ok(()),
        Some(name) if name == storage.name() => Ok(()),
        Some(name) => {
            let error = StorageError::Local(format!("unknown storage '{name}'"));
            Err(error_response(&error))
        }
    }
}

fn error_response(error: &StorageError) -> Response {
    let status = match error {
        StorageError::RecordDuplicated { .. } | StorageError::VersionConflict { .. } => {
            StatusCode::CONFLICT
        }
        StorageError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::DistributedUnavailable(_) => StatusCode::NOT_IMPLEMENTED,
        StorageError::RemoteRpc(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }),
    )
        .into_response()
}
