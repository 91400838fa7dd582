// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Generic REST routes that expose a `DataService` as a collection of records.

use crate::driver::{DataService, Params};
use crate::model::Model;
use crate::rest::{
    EmptyBody, JsonBody, RestError, RestResult, Service, ServiceResponse, ServiceRoute,
    WebService, get_unique_header_str,
};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post, put};
use http::{HeaderMap, Method};
use log::debug;
use std::sync::Arc;

/// Header that carries the key used to sign response payloads.
const SESSION_KEY_HEADER: &str = "x-session-key";

/// State shared by all the handlers of a `CrudWebService`.
struct CrudState<S> {
    /// The data service to delegate to.
    data: Arc<S>,

    /// Envelope builder.
    web: WebService,

    /// Payload key for lists of records.
    list_name: String,

    /// Payload key for single records.
    model_name: String,
}

/// Web service that serves a data service on `/<list_name>` and `/<list_name>/:id`.
///
/// Lists are returned under the `list_name` payload key and single records under the
/// `model_name` key.  Path parameters and query string entries are merged into the parameters
/// given to the data service, with the path taking precedence.
pub struct CrudWebService<S> {
    /// Unique name of the service.
    name: String,

    /// Handler state.
    state: Arc<CrudState<S>>,
}

impl<S: DataService + 'static> CrudWebService<S> {
    /// Creates a new web service named `name` for the records of `data`.
    pub fn new<N, L, M>(name: N, list_name: L, model_name: M, data: Arc<S>, web: WebService) -> Self
    where
        N: Into<String>,
        L: Into<String>,
        M: Into<String>,
    {
        let state = CrudState {
            data,
            web,
            list_name: list_name.into(),
            model_name: model_name.into(),
        };
        Self { name: name.into(), state: Arc::from(state) }
    }
}

impl<S: DataService + 'static> Service for CrudWebService<S> {
    fn service_name(&self) -> &str {
        &self.name
    }

    fn routes(&self) -> Vec<ServiceRoute> {
        let list_path = format!("/{}", self.state.list_name);
        let item_path = format!("/{}/:id", self.state.list_name);
        vec![
            ServiceRoute::new(
                Method::GET,
                list_path.clone(),
                get(query_handler::<S>).with_state(self.state.clone()),
            ),
            ServiceRoute::new(
                Method::GET,
                item_path.clone(),
                get(find_handler::<S>).with_state(self.state.clone()),
            ),
            ServiceRoute::new(
                Method::POST,
                list_path,
                post(save_handler::<S>).with_state(self.state.clone()),
            ),
            ServiceRoute::new(
                Method::PUT,
                item_path,
                put(update_handler::<S>).with_state(self.state.clone()),
            ),
        ]
    }
}

/// Merges the record `id` from the path into the query `params`.
fn with_id(mut params: Params, id: String) -> Params {
    params.insert("id".to_owned(), id);
    params
}

/// Lists the records that match `params`.
async fn query<S: DataService>(
    state: &CrudState<S>,
    headers: &HeaderMap,
    params: Params,
) -> RestResult<ServiceResponse> {
    let session = get_unique_header_str(headers, SESSION_KEY_HEADER)?;
    let models = state.data.query(&params).await?;
    debug!("Query {:?} returned {} records", params, models.len());
    state.web.create_success_response(&state.list_name, &models, session)
}

/// Fetches the record `id`.
async fn find<S: DataService>(
    state: &CrudState<S>,
    headers: &HeaderMap,
    id: String,
    params: Params,
) -> RestResult<ServiceResponse> {
    let session = get_unique_header_str(headers, SESSION_KEY_HEADER)?;
    let params = with_id(params, id);
    match state.data.find(&params).await? {
        Some(model) => state.web.create_success_response(&state.model_name, &model, session),
        None => Err(RestError::NotFound(format!("no record found for id {}", params["id"]))),
    }
}

/// Saves `model`, which must not name a different record than `id` if `id` is given.
async fn save<S: DataService>(
    state: &CrudState<S>,
    headers: &HeaderMap,
    id: Option<String>,
    params: Params,
    mut model: S::Model,
) -> RestResult<ServiceResponse> {
    let session = get_unique_header_str(headers, SESSION_KEY_HEADER)?;
    let params = match id {
        Some(id) => {
            if let Some(body_id) = model.base().id() {
                if body_id != id {
                    return Err(RestError::InvalidRequest(format!(
                        "Record id {} does not match id {} in the path",
                        body_id, id
                    )));
                }
            }
            model.base_mut().set_id(id.clone());
            with_id(params, id)
        }
        None => params,
    };
    let model = state.data.save(&params, model).await?;
    state.web.create_success_response(&state.model_name, &model, session)
}

/// GET handler for the whole collection.
async fn query_handler<S: DataService + 'static>(
    State(state): State<Arc<CrudState<S>>>,
    headers: HeaderMap,
    Query(params): Query<Params>,
    _: EmptyBody,
) -> Response {
    state.web.respond(query(&state, &headers, params).await)
}

/// GET handler for a single record.
async fn find_handler<S: DataService + 'static>(
    State(state): State<Arc<CrudState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<Params>,
    _: EmptyBody,
) -> Response {
    state.web.respond(find(&state, &headers, id, params).await)
}

/// POST handler to create a record.
async fn save_handler<S: DataService + 'static>(
    State(state): State<Arc<CrudState<S>>>,
    headers: HeaderMap,
    Query(params): Query<Params>,
    JsonBody(model): JsonBody<S::Model>,
) -> Response {
    state.web.respond(save(&state, &headers, None, params, model).await)
}

/// PUT handler to replace the record named in the path.
async fn update_handler<S: DataService + 'static>(
    State(state): State<Arc<CrudState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<Params>,
    JsonBody(model): JsonBody<S::Model>,
) -> Response {
    state.web.respond(save(&state, &headers, Some(id), params, model).await)
}
