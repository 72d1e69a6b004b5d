use routerify::ext::RequestExt;
use search_index::{QueryBuildError, SearchRequest};
use serde::Serialize;

use crate::bad_request;
use crate::error::ServerError;
use crate::helpers::{get_state, read_json, BeerRequest, BeerResponse};
use crate::responders::json_response;

#[derive(Serialize)]
struct Fields {
    fields: Vec<String>,
}

pub async fn search(mut req: BeerRequest) -> BeerResponse {
    let request: SearchRequest = read_json(&mut req).await?;
    let state = get_state(&req)?;

    let results = match state.index.search(request).await {
        Ok(results) => results,
        Err(e) => {
            return match e.downcast_ref::<QueryBuildError>() {
                Some(query_error) => bad_request!("{}", query_error),
                None => Err(ServerError::Other(e)),
            };
        },
    };

    if state.log_search {
        info!(
            "search returned {} of {} hits in {:.2}ms",
            results.hits.len(),
            results.total_hits,
            results.took * 1000.0,
        );
    }

    json_response(200, &results)
}

pub async fn fields(req: BeerRequest) -> BeerResponse {
    let state = get_state(&req)?;

    json_response(
        200,
        &Fields {
            fields: state.index.fields(),
        },
    )
}

pub async fn debug_document(req: BeerRequest) -> BeerResponse {
    let state = get_state(&req)?;
    let id = match req.param("docID") {
        Some(id) if !id.is_empty() => id.clone(),
        _ => return bad_request!("missing document id"),
    };

    match state.index.debug_document(id.clone()).await? {
        Some(doc) => json_response(200, &doc),
        None => Err(ServerError::NotFound(format!(
            "no document exists with id: {:?}",
            id
        ))),
    }
}
