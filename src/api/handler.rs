//! `/api` action dispatch

use std::collections::BTreeMap;
use std::collections::HashMap;

use axum::extract::{FromRequest, Query, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use kube::ResourceExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, instrument};

use super::auth::authenticate;
use super::error::{ApiError, Result};
use super::AppState;
use crate::template::DEFAULT_NAMESPACE;

/// Cache policy attached to every dispatched action
pub const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Request parameters as a JSON object
pub type Params = Map<String, Value>;

/// Operations selectable through the `action` parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Report the service version
    GetVersion,
    /// List all ConfigMaps
    GetConfigMaps,
    /// Read one ConfigMap
    GetConfigMap,
    /// Delete one ConfigMap
    DeleteConfigMap,
    /// Replace the data of one ConfigMap
    UpdateConfigMap,
}

impl Action {
    /// Parse the wire name of an action
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "get_version" => Some(Action::GetVersion),
            "get_configmaps" => Some(Action::GetConfigMaps),
            "get_configmap" => Some(Action::GetConfigMap),
            "delete_configmap" => Some(Action::DeleteConfigMap),
            "update_configmap" => Some(Action::UpdateConfigMap),
            _ => None,
        }
    }

    /// Whether the caller must present an active bearer token
    pub fn requires_auth(self) -> bool {
        !matches!(self, Action::GetVersion)
    }
}

#[derive(Debug, Deserialize)]
struct DataQuery {
    data: Option<String>,
}

/// Handle a request to `/api`
#[instrument(skip_all, fields(method = %request.method()))]
pub async fn api_handler(State(state): State<AppState>, request: Request) -> Result<Response> {
    let headers = request.headers().clone();
    let params = read_params(request).await?;

    let name = params
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("action parameter is missing".into()))?;

    let mut response = match dispatch(&state, &headers, name, &params).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    Ok(response)
}

async fn dispatch(
    state: &AppState,
    headers: &axum::http::HeaderMap,
    name: &str,
    params: &Params,
) -> Result<Response> {
    let action = Action::parse(name)
        .ok_or_else(|| ApiError::BadRequest("action parameter is invalid".into()))?;

    if action.requires_auth() {
        authenticate(state.auth.as_ref(), headers).await?;
    }

    info!(?action, "Dispatching admin action");
    match action {
        Action::GetVersion => {
            Ok(Json(json!({ "version": env!("CARGO_PKG_VERSION") })).into_response())
        }
        Action::GetConfigMaps => get_config_maps(state).await,
        Action::GetConfigMap => get_config_map(state, params).await,
        Action::DeleteConfigMap => delete_config_map(state, params).await,
        Action::UpdateConfigMap => update_config_map(state, params).await,
    }
}

/// Collect parameters from the query string (GET/HEAD) or the body (POST)
async fn read_params(request: Request) -> Result<Params> {
    let method = request.method().clone();
    if method == Method::GET || method == Method::HEAD {
        let Query(query) = Query::<DataQuery>::try_from_uri(request.uri())
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        if let Some(data) = query.data.filter(|d| !d.is_empty()) {
            return serde_json::from_str(&data).map_err(|e| ApiError::BadRequest(e.to_string()));
        }
        return Err(ApiError::MethodNotAllowed);
    }

    if method != Method::POST {
        return Err(ApiError::MethodNotAllowed);
    }

    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .unwrap_or_default()
        .to_ascii_lowercase();

    match content_type.as_str() {
        "application/json" => {
            let Json(params) = Json::<Params>::from_request(request, &())
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            Ok(params)
        }
        "application/x-www-form-urlencoded" => {
            let Form(form) = Form::<HashMap<String, String>>::from_request(request, &())
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            Ok(form
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect())
        }
        _ => Err(ApiError::BadRequest("Content-Type is not allowed".into())),
    }
}

/// `(namespace, name)` addressed by the request
fn target(params: &Params) -> Result<(String, String)> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing configmap name".into()))?;
    let namespace = params
        .get("namespace")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);
    Ok((namespace.to_string(), name.to_string()))
}

async fn get_config_maps(state: &AppState) -> Result<Response> {
    let config_maps = state.cluster.list_config_maps().await.map_err(|e| {
        error!(error = %e, "Failed to list ConfigMaps");
        ApiError::Internal("List error".into())
    })?;

    let items: Vec<Value> = config_maps
        .iter()
        .map(|cm| {
            json!({
                "name": cm.name_any(),
                "namespace": cm.namespace().unwrap_or_default(),
            })
        })
        .collect();
    Ok(Json(items).into_response())
}

async fn get_config_map(state: &AppState, params: &Params) -> Result<Response> {
    let (namespace, name) = target(params)?;
    let cm = state
        .cluster
        .get_config_map(&namespace, &name)
        .await
        .map_err(|e| {
            error!(%namespace, %name, error = %e, "Failed to get ConfigMap");
            ApiError::Internal("Get error".into())
        })?;

    Ok(Json(json!({
        "name": name,
        "namespace": namespace,
        "data": cm.data.unwrap_or_default(),
    }))
    .into_response())
}

async fn delete_config_map(state: &AppState, params: &Params) -> Result<Response> {
    let (namespace, name) = target(params)?;
    state
        .cluster
        .delete_config_map(&namespace, &name)
        .await
        .map_err(|e| {
            error!(%namespace, %name, error = %e, "Failed to delete ConfigMap");
            ApiError::Internal("Delete error".into())
        })?;

    info!(%namespace, %name, "ConfigMap deleted via admin API");
    Ok(Json(json!({ "status": "deleted" })).into_response())
}

async fn update_config_map(state: &AppState, params: &Params) -> Result<Response> {
    let (namespace, name) = target(params)?;
    let data = match params.get("data") {
        None => return Err(ApiError::BadRequest("Missing configmap data".into())),
        Some(Value::Object(raw)) => raw
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect::<BTreeMap<String, String>>(),
        Some(_) => return Err(ApiError::BadRequest("Invalid data format".into())),
    };

    state
        .cluster
        .replace_config_map_data(&namespace, &name, data)
        .await
        .map_err(|e| {
            error!(%namespace, %name, error = %e, "Failed to update ConfigMap");
            ApiError::Internal("Update error".into())
        })?;

    info!(%namespace, %name, "ConfigMap updated via admin API");
    Ok(Json(json!({ "status": "updated" })).into_response())
}
